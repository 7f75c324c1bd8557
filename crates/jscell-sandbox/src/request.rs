//! Caller-facing request and response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One function invocation to run inside a fresh isolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// JavaScript source defining the target function.
    pub code: String,
    /// Positional arguments, spread into the call.
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Name of the function to invoke.
    pub function_name: String,
    /// Skip the try/catch wrapper (transform and bundled payloads).
    #[serde(default)]
    pub skip_default_wrapper: bool,
}

impl ExecutionRequest {
    /// Build a wrapped-mode request.
    pub fn new(
        code: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            code: code.into(),
            arguments,
            function_name: function_name.into(),
            skip_default_wrapper: false,
        }
    }

    /// Set the wrapper-skip flag.
    pub fn skip_default_wrapper(mut self, skip: bool) -> Self {
        self.skip_default_wrapper = skip;
        self
    }
}

/// Successful invocation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// The returned value; `None` when the function returned `undefined`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Wall-clock time spent, in milliseconds with two-decimal precision.
    pub elapsed_millis: f64,
}

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Bad input shape; detected before any isolate exists.
    Validation,
    /// The isolate exceeded its wall-clock budget.
    Timeout,
    /// The sandbox denied an operation.
    RestrictedOperation,
    /// The named function does not resolve to a callable.
    FunctionNotFound,
    /// Any other thrown value.
    RuntimeError,
    /// A non-Error value with no message was thrown.
    Unknown,
}

impl FailureCategory {
    /// Stable snake_case label for logs and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::RestrictedOperation => "restricted_operation",
            Self::FunctionNotFound => "function_not_found",
            Self::RuntimeError => "runtime_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure. Always carries the elapsed time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    /// Failure category.
    pub category: FailureCategory,
    /// Caller-safe message (no stack frames, paths, or credentials).
    pub message: String,
    /// Wall-clock time spent, in milliseconds with two-decimal precision.
    pub elapsed_millis: f64,
}

impl ExecutionFailure {
    /// Create a failure with the elapsed time already measured.
    pub fn new(category: FailureCategory, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            category,
            message: message.into(),
            elapsed_millis: elapsed_millis(elapsed),
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({:.2}ms)",
            self.category, self.message, self.elapsed_millis
        )
    }
}

impl std::error::Error for ExecutionFailure {}

/// Wire shape returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionResponse {
    /// `{ value, elapsedMillis }`
    Success(ExecutionResult),
    /// `{ category, message, elapsedMillis }`
    Failure(ExecutionFailure),
}

impl ExecutionResponse {
    /// Elapsed milliseconds, present on both arms.
    pub fn elapsed_millis(&self) -> f64 {
        match self {
            Self::Success(r) => r.elapsed_millis,
            Self::Failure(f) => f.elapsed_millis,
        }
    }
}

impl From<Result<ExecutionResult, ExecutionFailure>> for ExecutionResponse {
    fn from(result: Result<ExecutionResult, ExecutionFailure>) -> Self {
        match result {
            Ok(r) => Self::Success(r),
            Err(f) => Self::Failure(f),
        }
    }
}

/// Convert a duration to milliseconds rounded to two decimals.
pub fn elapsed_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}
