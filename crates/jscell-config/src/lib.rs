#![warn(missing_docs)]

//! # jscell-config
//!
//! Configuration loading for the jscell sandbox service.
//!
//! Supports TOML configuration files with environment variable expansion.
//! Configuration is read once per process.
//!
//! ## Example
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 5000
//! bridge_timeout_ms = 4000
//! max_heap_mb = 64
//! max_concurrent = 8
//! environment = "production"
//!
//! [sandbox.capabilities]
//! allow_http = true
//!
//! [http]
//! timeout_secs = 30
//!
//! [auth]
//! token_url = "https://auth.example.com/oauth/token"
//! client_id = "jscell"
//! client_secret = "${JSCELL_CLIENT_SECRET}"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level jscell configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JscellConfig {
    /// Sandbox execution settings.
    #[serde(default)]
    pub sandbox: SandboxSection,

    /// Outbound HTTP settings.
    #[serde(default)]
    pub http: HttpSection,

    /// Bearer credential settings. Absent means calls carry no credential.
    #[serde(default)]
    pub auth: Option<AuthSection>,
}

/// `[sandbox]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    /// Isolate wall-clock budget in milliseconds.
    pub timeout_ms: u64,
    /// Bridge ceiling in milliseconds. Must be below `timeout_ms`.
    pub bridge_timeout_ms: u64,
    /// V8 heap limit in megabytes.
    pub max_heap_mb: usize,
    /// Maximum live isolates.
    pub max_concurrent: usize,
    /// Maximum code size in kilobytes.
    pub max_code_size_kb: usize,
    /// Size in bytes above which module-free code counts as pre-bundled.
    pub bundled_code_threshold: usize,
    /// Exposed to sandbox code as `process.env.NODE_ENV`.
    pub environment: String,
    /// Enable the legacy REST client auto-await pass.
    pub legacy_rest_await: bool,
    /// Capability toggles.
    pub capabilities: CapabilityToggles,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            bridge_timeout_ms: 4000,
            max_heap_mb: 64,
            max_concurrent: 8,
            max_code_size_kb: 5120,
            bundled_code_threshold: 16 * 1024,
            environment: "production".to_string(),
            legacy_rest_await: true,
            capabilities: CapabilityToggles::default(),
        }
    }
}

impl SandboxSection {
    /// Isolate timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bridge ceiling as a [`Duration`].
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}

/// `[sandbox.capabilities]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityToggles {
    /// `fetch`, `XMLHttpRequest`, and the REST client.
    pub allow_http: bool,
    /// Console forwarding.
    pub allow_console: bool,
    /// Timer functions.
    pub allow_timers: bool,
}

impl Default for CapabilityToggles {
    fn default() -> Self {
        Self {
            allow_http: true,
            allow_console: true,
            allow_timers: true,
        }
    }
}

/// `[http]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("jscell/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// `[auth]`: OAuth2 client-credentials grant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    /// Token endpoint.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret, usually `${ENV_VAR}`.
    #[serde(default)]
    pub client_secret: String,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Tenant used when sandbox code names none.
    #[serde(default)]
    pub default_tenant: Option<String>,
}

impl JscellConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: JscellConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sandbox = &self.sandbox;
        if sandbox.timeout_ms == 0 {
            return Err(ConfigError::Invalid("sandbox.timeout_ms must be non-zero".into()));
        }
        if sandbox.bridge_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.bridge_timeout_ms must be non-zero".into(),
            ));
        }
        if sandbox.bridge_timeout_ms >= sandbox.timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "sandbox.bridge_timeout_ms ({}) must be less than sandbox.timeout_ms ({})",
                sandbox.bridge_timeout_ms, sandbox.timeout_ms
            )));
        }
        if sandbox.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.max_concurrent must be at least 1".into(),
            ));
        }
        if sandbox.max_heap_mb == 0 || sandbox.max_code_size_kb == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.max_heap_mb and sandbox.max_code_size_kb must be non-zero".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("http.timeout_secs must be non-zero".into()));
        }
        if let Some(auth) = &self.auth {
            if auth.token_url.trim().is_empty() {
                return Err(ConfigError::Invalid("auth.token_url must not be empty".into()));
            }
            if auth.client_id.trim().is_empty() {
                return Err(ConfigError::Invalid("auth.client_id must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // Leave the placeholder if env var not found
                Err(_) => result.push_str(&format!("${{{var_name}}}")),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = JscellConfig::from_toml("").unwrap();
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(5));
        assert_eq!(config.sandbox.bridge_timeout(), Duration::from_secs(4));
        assert_eq!(config.sandbox.max_heap_mb, 64);
        assert_eq!(config.sandbox.max_concurrent, 8);
        assert_eq!(config.sandbox.environment, "production");
        assert!(config.sandbox.legacy_rest_await);
        assert!(config.sandbox.capabilities.allow_http);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(config.http.user_agent.starts_with("jscell/"));
        assert!(config.auth.is_none());
    }

    #[test]
    fn config_parses_full_example() {
        let toml = r#"
            [sandbox]
            timeout_ms = 8000
            bridge_timeout_ms = 6000
            max_heap_mb = 128
            max_concurrent = 2
            max_code_size_kb = 256
            bundled_code_threshold = 4096
            environment = "staging"
            legacy_rest_await = false

            [sandbox.capabilities]
            allow_http = false
            allow_console = false
            allow_timers = true

            [http]
            timeout_secs = 10
            user_agent = "acme-runner/2"

            [auth]
            token_url = "https://auth.example.com/oauth/token"
            client_id = "runner"
            client_secret = "s3cret"
            scopes = ["api", "read"]
            default_tenant = "acme"
        "#;

        let config = JscellConfig::from_toml(toml).unwrap();
        assert_eq!(config.sandbox.timeout_ms, 8000);
        assert_eq!(config.sandbox.bridge_timeout_ms, 6000);
        assert_eq!(config.sandbox.max_code_size_kb, 256);
        assert_eq!(config.sandbox.bundled_code_threshold, 4096);
        assert_eq!(config.sandbox.environment, "staging");
        assert!(!config.sandbox.legacy_rest_await);
        assert!(!config.sandbox.capabilities.allow_http);
        assert!(!config.sandbox.capabilities.allow_console);
        assert_eq!(config.http.user_agent, "acme-runner/2");

        let auth = config.auth.unwrap();
        assert_eq!(auth.client_id, "runner");
        assert_eq!(auth.scopes, vec!["api", "read"]);
        assert_eq!(auth.default_tenant.as_deref(), Some("acme"));
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let toml = r#"
            [sandbox]
            timeout_ms = 9000

            [sandbox.capabilities]
            allow_timers = false
        "#;
        let config = JscellConfig::from_toml(toml).unwrap();
        assert_eq!(config.sandbox.timeout_ms, 9000);
        assert_eq!(config.sandbox.bridge_timeout_ms, 4000);
        assert!(!config.sandbox.capabilities.allow_timers);
        assert!(config.sandbox.capabilities.allow_http);
    }

    #[test]
    fn config_expands_environment_variables() {
        std::env::set_var("JSCELL_TEST_CLIENT_SECRET", "from-env");
        let toml = r#"
            [auth]
            token_url = "https://auth.example.com/token"
            client_id = "runner"
            client_secret = "${JSCELL_TEST_CLIENT_SECRET}"
        "#;

        let config = JscellConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(config.auth.unwrap().client_secret, "from-env");
        std::env::remove_var("JSCELL_TEST_CLIENT_SECRET");
    }

    #[test]
    fn bridge_timeout_must_be_below_timeout() {
        let toml = r#"
            [sandbox]
            timeout_ms = 3000
            bridge_timeout_ms = 3000
        "#;
        let err = JscellConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("bridge_timeout_ms"), "{err}");
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        for toml in [
            "[sandbox]\ntimeout_ms = 0",
            "[sandbox]\nbridge_timeout_ms = 0",
            "[http]\ntimeout_secs = 0",
            "[sandbox]\nmax_concurrent = 0",
        ] {
            assert!(
                matches!(JscellConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "{toml}"
            );
        }
    }

    #[test]
    fn auth_requires_url_and_client_id() {
        let toml = r#"
            [auth]
            token_url = ""
            client_id = "runner"
        "#;
        let err = JscellConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("token_url"));

        let toml = r#"
            [auth]
            token_url = "https://auth.example.com/token"
            client_id = "  "
        "#;
        let err = JscellConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = JscellConfig::from_toml("[sandbox]\ntimeout_secs = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jscell.toml");
        std::fs::write(
            &path,
            r#"
            [sandbox]
            environment = "test"
        "#,
        )
        .unwrap();

        let config = JscellConfig::from_file(&path).unwrap();
        assert_eq!(config.sandbox.environment, "test");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JscellConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }

    #[test]
    fn env_var_expansion_handles_no_vars() {
        let result = expand_env_vars("no variables here");
        assert_eq!(result, "no variables here");
    }
}
