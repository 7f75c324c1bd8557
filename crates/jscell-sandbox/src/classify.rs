//! Maps raw sandbox failures onto the caller-facing taxonomy.
//!
//! Matching is by fixed substring markers, checked in order. The harness's own
//! `FunctionNotFound:` sentinel is checked first so a function whose name
//! happens to contain a marker word (`fetchWithTimeout`) is still reported as
//! missing rather than timed out.

use std::time::Duration;

use crate::error::SandboxError;
use crate::redact::redact_message;
use crate::request::{ExecutionFailure, FailureCategory};

/// Sentinel prefix thrown by the harness existence guard.
pub const FUNCTION_NOT_FOUND_SENTINEL: &str = "FunctionNotFound:";

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout"];
const RESTRICTED_MARKERS: &[&str] = &["restricted", "forbidden", "not allowed"];
const NOT_FOUND_MARKERS: &[&str] = &["is not a function", "is not defined"];

/// Classify `error` for the invocation of `function_name`.
///
/// A failure that an inner stage already classified passes through with its
/// original category, message, and elapsed time.
pub fn classify(error: SandboxError, function_name: &str, elapsed: Duration) -> ExecutionFailure {
    let failure = |category, message: String| ExecutionFailure::new(category, message, elapsed);

    match error {
        SandboxError::Classified(inner) => inner,
        e if e.is_pre_isolate() => failure(
            FailureCategory::Validation,
            format!("Invalid request: {}", redact_message(&e.to_string())),
        ),
        SandboxError::Serialization(e) => failure(
            FailureCategory::Validation,
            format!("Invalid request: {e}"),
        ),
        SandboxError::Timeout { timeout_ms } => failure(
            FailureCategory::Timeout,
            format!("Execution timed out after {timeout_ms}ms"),
        ),
        SandboxError::HeapLimitExceeded => failure(
            FailureCategory::RuntimeError,
            "Execution error: heap limit exceeded".to_string(),
        ),
        e @ SandboxError::Setup { .. } => {
            failure(FailureCategory::RuntimeError, redact_message(&e.to_string()))
        }
        SandboxError::Thrown {
            name: None,
            message: None,
        } => failure(
            FailureCategory::Unknown,
            "Execution error: a non-Error value was thrown".to_string(),
        ),
        other => {
            let raw = redact_message(&other.to_string());
            let (category, message) = classify_message(&raw, function_name);
            failure(category, message)
        }
    }
}

/// Marker-based classification of a raw, already-redacted message.
pub fn classify_message(raw: &str, function_name: &str) -> (FailureCategory, String) {
    let not_found = || format!("Function '{function_name}' was not found or is not a function");

    if raw.contains(FUNCTION_NOT_FOUND_SENTINEL) {
        return (FailureCategory::FunctionNotFound, not_found());
    }

    let lower = raw.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(TIMEOUT_MARKERS) {
        (FailureCategory::Timeout, raw.to_string())
    } else if has(RESTRICTED_MARKERS) {
        (FailureCategory::RestrictedOperation, raw.to_string())
    } else if has(NOT_FOUND_MARKERS) {
        (FailureCategory::FunctionNotFound, format!("{} ({raw})", not_found()))
    } else {
        (FailureCategory::RuntimeError, format!("Execution error: {raw}"))
    }
}
