//! Error types for the jscell sandbox.

use thiserror::Error;

use crate::request::ExecutionFailure;

/// Raw failures produced while preparing or running an invocation.
///
/// These are mapped onto the caller-facing taxonomy by
/// [`crate::classify::classify`].
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The request failed validation checks.
    #[error("request validation failed: {reason}")]
    ValidationFailed {
        /// What went wrong.
        reason: String,
    },

    /// Code exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Isolate construction or capability wiring failed.
    #[error("sandbox setup failed: {message}")]
    Setup {
        /// Underlying engine message.
        message: String,
    },

    /// Execution exceeded the wall-clock budget (CPU watchdog or event loop deadline).
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The target function (or code it called) threw.
    #[error("{}", thrown_display(.name, .message))]
    Thrown {
        /// `error.name` when an Error object was thrown.
        name: Option<String>,
        /// `error.message`, or the stringified thrown value.
        message: Option<String>,
    },

    /// The script failed outside the invocation (syntax error, uncaught
    /// exception in a timer callback, engine error).
    #[error("javascript error: {message}")]
    JsError {
        /// The engine's message.
        message: String,
    },

    /// The event loop drained without the invocation promise settling.
    #[error("function did not settle: the returned promise never resolved")]
    Unsettled,

    /// V8 heap memory limit was exceeded.
    #[error("V8 heap limit exceeded")]
    HeapLimitExceeded,

    /// Argument or result serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Host-side failure (thread spawn, runtime build, panic).
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// An inner stage already classified and timed this failure.
    #[error("{0}")]
    Classified(ExecutionFailure),
}

fn thrown_display(name: &Option<String>, message: &Option<String>) -> String {
    match (name, message) {
        (Some(n), Some(m)) if !n.is_empty() => format!("{n}: {m}"),
        (_, Some(m)) => m.clone(),
        (Some(n), None) => n.clone(),
        (None, None) => "a non-Error value was thrown".to_string(),
    }
}

impl SandboxError {
    /// Whether this failure happened before an isolate was constructed.
    pub fn is_pre_isolate(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::CodeTooLarge { .. }
        )
    }
}

impl From<ExecutionFailure> for SandboxError {
    fn from(failure: ExecutionFailure) -> Self {
        Self::Classified(failure)
    }
}
