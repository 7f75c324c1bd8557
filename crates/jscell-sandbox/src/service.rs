//! Caller-facing entry points producing the wire response.

use std::time::Instant;

use crate::executor::SandboxExecutor;
use crate::request::{ExecutionFailure, ExecutionRequest, ExecutionResponse, FailureCategory};

/// Run `request` and fold the outcome into the wire union.
pub async fn handle(executor: &SandboxExecutor, request: ExecutionRequest) -> ExecutionResponse {
    executor.execute(request).await.into()
}

/// Parse a raw JSON request body and run it.
///
/// A body that does not deserialize into an [`ExecutionRequest`] is a
/// `Validation` failure; no isolate is created for it.
pub async fn handle_json(executor: &SandboxExecutor, body: &str) -> ExecutionResponse {
    let start = Instant::now();
    match serde_json::from_str::<ExecutionRequest>(body) {
        Ok(request) => handle(executor, request).await,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed request body");
            ExecutionResponse::Failure(ExecutionFailure::new(
                FailureCategory::Validation,
                format!("Invalid request: {e}"),
                start.elapsed(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SandboxConfig;
    use serde_json::json;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    #[tokio::test]
    async fn json_round_trip_on_the_wire() {
        let body = r#"{"code":"function add(a,b){return a+b;}","arguments":[5,10],"functionName":"add"}"#;
        let resp = handle_json(&executor(), body).await;
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["value"], json!(15));
        assert!(wire["elapsedMillis"].is_number());
    }

    #[tokio::test]
    async fn malformed_body_is_validation() {
        for body in [
            "not json",
            r#"{"code":42,"functionName":"f"}"#,
            r#"{"code":"function f(){}"}"#,
            r#"{"code":"function f(){}","functionName":"f","arguments":"nope"}"#,
        ] {
            match handle_json(&executor(), body).await {
                ExecutionResponse::Failure(f) => {
                    assert_eq!(f.category, FailureCategory::Validation, "{body}");
                    assert!(f.message.starts_with("Invalid request:"), "{}", f.message);
                }
                other => panic!("expected failure for {body}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn failure_serializes_category_and_message() {
        let resp = handle(
            &executor(),
            ExecutionRequest::new("function add(a,b){return a+b;}", "nope", vec![]),
        )
        .await;
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["category"], json!("FunctionNotFound"));
        assert!(wire["message"].as_str().unwrap().contains("'nope'"));
        assert!(wire.get("value").is_none());
    }
}
