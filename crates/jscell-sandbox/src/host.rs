//! Host-side network call issued on behalf of sandbox code.
//!
//! Sandbox code never sees credentials: the bearer token is attached here,
//! after the request has left the isolate.

use std::sync::Arc;

use jscell_error::HostError;
use serde::{Deserialize, Serialize};

use crate::{HttpClient, TokenFetcher};

/// An outbound HTTP request built by sandbox code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    /// HTTP method, upper-cased before dispatch.
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs in insertion order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Request body text.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HostRequest {
    /// A bodiless GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Case-insensitive header presence check.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Check the request is well-formed before it is dispatched.
    pub fn validate(&self) -> Result<(), HostError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| HostError::InvalidRequest(format!("invalid URL '{}': {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HostError::InvalidRequest(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        if self.method.is_empty() || !self.method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(HostError::InvalidRequest(format!(
                "invalid HTTP method '{}'",
                self.method
            )));
        }
        Ok(())
    }
}

/// The response handed back to sandbox code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lower-cased.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Response body text.
    pub body: String,
}

impl HostResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issue `request` with a bearer credential, failing on non-success status.
///
/// Credential fetching fails open: if the token fetcher errors, the call
/// proceeds without an `Authorization` header. A caller-supplied
/// `Authorization` header is never overwritten.
pub async fn authorized_call(
    http: Arc<dyn HttpClient>,
    tokens: Option<Arc<dyn TokenFetcher>>,
    tenant: Option<String>,
    request: HostRequest,
) -> Result<HostResponse, HostError> {
    let response = authorized_send(http, tokens, tenant, request).await?;
    if !response.is_success() {
        return Err(HostError::Status {
            status: response.status,
            body: response.body,
        });
    }
    Ok(response)
}

/// Like [`authorized_call`], but any status is returned as a response.
///
/// With `tokens` set to `None` this is a plain validated send.
pub async fn authorized_send(
    http: Arc<dyn HttpClient>,
    tokens: Option<Arc<dyn TokenFetcher>>,
    tenant: Option<String>,
    mut request: HostRequest,
) -> Result<HostResponse, HostError> {
    request.method = request.method.to_ascii_uppercase();
    request.validate()?;

    if let Some(tokens) = tokens {
        if !request.has_header("authorization") {
            match tokens.fetch_bearer_token(tenant.as_deref()).await {
                Ok(token) => request
                    .headers
                    .push(("Authorization".to_string(), format!("Bearer {token}"))),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        tenant = tenant.as_deref().unwrap_or("default"),
                        "bearer token unavailable, continuing without credentials"
                    );
                }
            }
        }
    }

    tracing::debug!(method = %request.method, url = %request.url, "host call dispatched");

    http.send(request).await
}
