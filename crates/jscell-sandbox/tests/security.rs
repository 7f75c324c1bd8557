//! Isolation checks run through the full execute pipeline.

use jscell_sandbox::{ExecutionRequest, FailureCategory, SandboxConfig, SandboxExecutor};
use serde_json::{json, Value};

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default())
}

async fn value_of(body: &str) -> Option<Value> {
    let code = format!("function subject(){{ {body} }}");
    executor()
        .execute(ExecutionRequest::new(code, "subject", vec![]))
        .await
        .unwrap_or_else(|f| panic!("subject failed: {f}"))
        .value
}

#[tokio::test]
async fn deno_namespace_is_absent() {
    assert_eq!(value_of("return typeof Deno;").await, Some(json!("undefined")));
    assert_eq!(
        value_of("return typeof globalThis.Deno;").await,
        Some(json!("undefined"))
    );
}

#[tokio::test]
async fn eval_is_absent() {
    assert_eq!(value_of("return typeof eval;").await, Some(json!("undefined")));
}

#[tokio::test]
async fn function_constructor_is_unreachable() {
    let failure = executor()
        .execute(ExecutionRequest::new(
            "function subject(){ return subject.constructor('return 1')(); }",
            "subject",
            vec![],
        ))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::FunctionNotFound);

    assert_eq!(
        value_of("return [(async () => {}).constructor, (function*(){}).constructor];").await,
        Some(json!([null, null]))
    );
}

#[tokio::test]
async fn global_function_constructor_is_absent() {
    assert_eq!(value_of("return typeof Function;").await, Some(json!("undefined")));
    assert_eq!(
        value_of(r#"try { return Function("return 1")(); } catch (e) { return e.name; }"#).await,
        Some(json!("ReferenceError"))
    );
    assert_eq!(
        value_of(r#"return typeof globalThis["Func" + "tion"];"#).await,
        Some(json!("undefined"))
    );
}

#[tokio::test]
async fn document_is_defined_but_undefined() {
    assert_eq!(
        value_of(r#"return ["document" in globalThis, typeof document];"#).await,
        Some(json!([true, "undefined"]))
    );
}

#[tokio::test]
async fn no_filesystem_or_module_globals() {
    assert_eq!(
        value_of("return [typeof require, typeof module, typeof Buffer, typeof fs];").await,
        Some(json!(["undefined", "undefined", "undefined", "undefined"]))
    );
}

#[tokio::test]
async fn reporter_cannot_be_replaced() {
    let result = executor()
        .execute(ExecutionRequest::new(
            r#"function subject(){
                try { globalThis.__jscell = { settle: () => {} }; } catch (_) {}
                try { __jscell.settle = () => {}; } catch (_) {}
                return "real";
            }"#,
            "subject",
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!("real")));
}

#[tokio::test]
async fn process_is_frozen() {
    assert_eq!(
        value_of(
            r#"try { process.env.NODE_ENV = "development"; } catch (_) {}
               return [process.env.NODE_ENV, Object.keys(process.env)];"#
        )
        .await,
        Some(json!(["production", ["NODE_ENV"]]))
    );
}

#[tokio::test]
async fn failure_messages_are_redacted() {
    let failure = executor()
        .execute(ExecutionRequest::new(
            r#"function subject(){
                throw new Error("upstream rejected Bearer abcdef123456 at /srv/app/secrets.json");
            }"#,
            "subject",
            vec![],
        ))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::RuntimeError);
    assert!(!failure.message.contains("abcdef123456"), "{}", failure.message);
    assert!(!failure.message.contains("/srv/app"), "{}", failure.message);
    assert!(failure.message.contains("[REDACTED]"), "{}", failure.message);
}
