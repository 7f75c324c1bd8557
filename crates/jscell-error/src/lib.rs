//! Typed error types for jscell host-side collaborators.
//!
//! Provides [`HostError`], the canonical error for outbound network calls
//! issued on behalf of sandbox code, and [`TokenError`] for the bearer
//! credential fetcher.

use thiserror::Error;

/// Canonical error type for host calls made on behalf of sandbox code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// The remote endpoint answered with a non-success HTTP status.
    #[error("request failed with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The request could not be delivered (DNS, connect, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The host call did not complete within its deadline.
    #[error("host call timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The capability backing this call is disabled for the sandbox.
    #[error("restricted operation: {0}")]
    Restricted(String),

    /// The request built by sandbox code is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HostError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Status { .. } => "HTTP_STATUS",
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Restricted(_) => "RESTRICTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the call may succeed if issued again.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::Timeout { .. } => true,
            Self::Restricted(_) => false,
            Self::InvalidRequest(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Convert to a structured JSON object for logs and diagnostics.
    pub fn to_structured_error(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });
        if let Self::Status { status, .. } = self {
            obj["status"] = serde_json::Value::from(*status);
        }
        obj
    }
}

/// Errors raised while obtaining a bearer credential.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The token endpoint could not be reached.
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),

    /// The token endpoint rejected the client credentials.
    #[error("token request rejected ({status}): {reason}")]
    Rejected {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// The provider's error code and description.
        reason: String,
    },

    /// The token endpoint answered with something that is not a token response.
    #[error("malformed token response: {0}")]
    Malformed(String),

    /// No credentials are configured for the requested tenant.
    #[error("no credentials configured for tenant '{0}'")]
    UnknownTenant(String),
}

// Compile-time assertion: errors cross task boundaries
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<HostError>();
    assert_bounds::<TokenError>();
};
