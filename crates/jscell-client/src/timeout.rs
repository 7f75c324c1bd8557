//! Per-call deadline wrapper for host HTTP clients.

use std::sync::Arc;
use std::time::Duration;

use jscell_error::HostError;
use jscell_sandbox::{HostRequest, HostResponse, HttpClient};

/// An [`HttpClient`] that enforces a per-call timeout on the inner client.
pub struct TimeoutHttpClient {
    inner: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl TimeoutHttpClient {
    /// Wrap an inner client with a per-call timeout.
    pub fn new(inner: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl HttpClient for TimeoutHttpClient {
    #[tracing::instrument(skip(self, request), fields(url = %request.url))]
    async fn send(&self, request: HostRequest) -> Result<HostResponse, HostError> {
        match tokio::time::timeout(self.timeout, self.inner.send(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(HostError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
