#![warn(missing_docs)]

//! # jscell-client
//!
//! Concrete host collaborators for the jscell sandbox.
//!
//! Provides [`ReqwestHttpClient`] for outbound HTTP issued on behalf of
//! sandbox code, [`ClientCredentialsTokenFetcher`] for OAuth2 bearer tokens,
//! and [`TimeoutHttpClient`] for a per-call deadline.

pub mod oauth;
pub mod timeout;

use std::time::Duration;

use jscell_error::HostError;
use jscell_sandbox::{HostRequest, HostResponse, HttpClient};

pub use oauth::{ClientCredentialsTokenFetcher, OAuthSettings};
pub use timeout::TimeoutHttpClient;

/// Settings for [`ReqwestHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    /// Whole-request timeout, including reading the body.
    pub timeout: Duration,
    /// `User-Agent` sent on every request.
    pub user_agent: String,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("jscell/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Outbound HTTP over `reqwest`.
///
/// Idle connections are not pooled: sandbox calls target arbitrary hosts and
/// a kept-alive socket would outlive the invocation that opened it.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    /// Build a client from `settings`.
    pub fn new(settings: &HttpClientSettings) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| HostError::Internal(e.into()))?;
        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> HostError {
        if e.is_timeout() {
            HostError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            HostError::Transport(e.to_string())
        }
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method))]
    async fn send(&self, request: HostRequest) -> Result<HostResponse, HostError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HostError::InvalidRequest(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        tracing::debug!(status, body_len = body.len(), "host call completed");

        Ok(HostResponse {
            status,
            headers,
            body,
        })
    }
}
