//! OAuth2 client-credentials token fetcher with a per-tenant cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jscell_error::TokenError;
use jscell_sandbox::TokenFetcher;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before the provider says they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Client-credentials grant settings.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Token endpoint.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Scopes requested, joined with spaces.
    pub scopes: Vec<String>,
    /// Tenant used when a call names none.
    pub default_tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Fetches bearer tokens with the client-credentials grant.
///
/// Tokens are cached per tenant until [`REFRESH_MARGIN`] before expiry.
/// Lookups are serialized, so concurrent misses share one refresh.
pub struct ClientCredentialsTokenFetcher {
    http: reqwest::Client,
    settings: OAuthSettings,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentialsTokenFetcher {
    /// Create a fetcher using `http` to reach the token endpoint.
    pub fn new(http: reqwest::Client, settings: OAuthSettings) -> Self {
        Self {
            http,
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn request_token(&self, tenant: Option<&str>) -> Result<CachedToken, TokenError> {
        let scope = self.settings.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }
        if let Some(tenant) = tenant {
            params.push(("tenant", tenant));
        }

        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&text)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {desc}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&text).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(TokenError::Malformed(format!("unsupported token type '{kind}'")));
            }
        }

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}

#[async_trait::async_trait]
impl TokenFetcher for ClientCredentialsTokenFetcher {
    async fn fetch_bearer_token(&self, tenant: Option<&str>) -> Result<String, TokenError> {
        let tenant = tenant.or(self.settings.default_tenant.as_deref());
        let key = tenant.unwrap_or_default().to_string();

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&key) {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        tracing::debug!(tenant = tenant.unwrap_or("default"), "requesting bearer token");
        let fresh = self.request_token(tenant).await?;
        let token = fresh.access_token.clone();
        cache.insert(key, fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_tolerates_missing_optionals() {
        let t: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(t.access_token, "abc");
        assert!(t.expires_in.is_none());
        assert!(t.token_type.is_none());
    }

    #[test]
    fn error_response_parses() {
        let e: TokenErrorResponse = serde_json::from_str(
            r#"{"error":"invalid_client","error_description":"bad secret"}"#,
        )
        .unwrap();
        assert_eq!(e.error, "invalid_client");
        assert_eq!(e.error_description.as_deref(), Some("bad secret"));
    }
}
