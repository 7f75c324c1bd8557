#![warn(missing_docs)]

//! jscell: run one JavaScript function call in a fresh sandbox.
//!
//! Reads a request (`{"code", "functionName", "arguments", "skipDefaultWrapper"}`)
//! from the file named on the command line, or from stdin, and prints the
//! response JSON to stdout. Logs go to stderr.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jscell_client::{
    ClientCredentialsTokenFetcher, HttpClientSettings, OAuthSettings, ReqwestHttpClient,
    TimeoutHttpClient,
};
use jscell_config::JscellConfig;
use jscell_sandbox::audit::TracingAuditLogger;
use jscell_sandbox::{
    service, CapabilitySet, ExecutionResponse, HttpClient, SandboxConfig, SandboxExecutor,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: jscell [REQUEST_FILE]

Runs one sandboxed function call. The request JSON is read from REQUEST_FILE,
or from stdin when no file (or `-`) is given.

environment:
  JSCELL_CONFIG   path to a TOML config file (default: ./jscell.toml if present)
  RUST_LOG        log filter (default: info)";

/// Build SandboxConfig from the `[sandbox]` section.
fn build_sandbox_config(config: &jscell_config::SandboxSection) -> SandboxConfig {
    SandboxConfig {
        timeout: config.timeout(),
        max_code_size: config.max_code_size_kb * 1024,
        max_heap_size: config.max_heap_mb * 1024 * 1024,
        max_concurrent: config.max_concurrent,
        bundled_code_threshold: config.bundled_code_threshold,
        legacy_rest_await: config.legacy_rest_await,
        capabilities: CapabilitySet {
            allow_http: config.capabilities.allow_http,
            allow_console: config.capabilities.allow_console,
            allow_timers: config.capabilities.allow_timers,
            environment: config.environment.clone(),
            bridge_timeout: config.bridge_timeout(),
        },
    }
}

/// Locate the config file.
///
/// Search order:
/// 1. `JSCELL_CONFIG` environment variable
/// 2. `./jscell.toml` in the current directory
/// 3. None (defaults apply)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("JSCELL_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("jscell.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

/// Wire the executor and its collaborators from config.
fn build_executor(config: &JscellConfig) -> Result<SandboxExecutor> {
    let sandbox_config = build_sandbox_config(&config.sandbox);
    let call_deadline = sandbox_config.timeout;

    let http = ReqwestHttpClient::new(&HttpClientSettings {
        timeout: Duration::from_secs(config.http.timeout_secs),
        user_agent: config.http.user_agent.clone(),
    })
    .context("failed to build HTTP client")?;
    let http: Arc<dyn HttpClient> = Arc::new(TimeoutHttpClient::new(Arc::new(http), call_deadline));

    let mut executor = SandboxExecutor::new(sandbox_config)
        .with_http_client(http)
        .with_audit_logger(Arc::new(TracingAuditLogger));

    if let Some(auth) = &config.auth {
        tracing::info!(token_url = %auth.token_url, "bearer credentials enabled");
        let token_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .user_agent(config.http.user_agent.as_str())
            .build()
            .context("failed to build token client")?;
        let fetcher = ClientCredentialsTokenFetcher::new(
            token_http,
            OAuthSettings {
                token_url: auth.token_url.clone(),
                client_id: auth.client_id.clone(),
                client_secret: auth.client_secret.clone(),
                scopes: auth.scopes.clone(),
                default_tenant: auth.default_tenant.clone(),
            },
        );
        executor = executor.with_token_fetcher(Arc::new(fetcher));
    }

    Ok(executor)
}

fn read_request(source: Option<&Path>) -> Result<String> {
    match source {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {}", path.display())),
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version / --help before anything else
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("jscell {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") || args.len() > 1 {
        println!("{USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config = match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            JscellConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => {
            tracing::info!("no config file found, using defaults");
            JscellConfig::from_toml("")?
        }
    };

    let executor = build_executor(&config)?;

    let source = args.first().filter(|a| a.as_str() != "-").map(PathBuf::from);
    let body = read_request(source.as_deref())?;

    let response = service::handle_json(&executor, &body).await;
    println!(
        "{}",
        serde_json::to_string(&response).context("failed to serialize response")?
    );

    if matches!(response, ExecutionResponse::Failure(_)) {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_config_maps_units() {
        let config = JscellConfig::from_toml(
            r#"
            [sandbox]
            timeout_ms = 2500
            bridge_timeout_ms = 1500
            max_heap_mb = 32
            max_code_size_kb = 10
            environment = "qa"

            [sandbox.capabilities]
            allow_console = false
        "#,
        )
        .unwrap();
        let sandbox = build_sandbox_config(&config.sandbox);
        assert_eq!(sandbox.timeout, Duration::from_millis(2500));
        assert_eq!(sandbox.capabilities.bridge_timeout, Duration::from_millis(1500));
        assert_eq!(sandbox.max_heap_size, 32 * 1024 * 1024);
        assert_eq!(sandbox.max_code_size, 10 * 1024);
        assert_eq!(sandbox.capabilities.environment, "qa");
        assert!(!sandbox.capabilities.allow_console);
        assert!(sandbox.capabilities.allow_http);
    }

    #[test]
    fn executor_builds_from_defaults() {
        let config = JscellConfig::from_toml("").unwrap();
        let executor = build_executor(&config).unwrap();
        assert_eq!(executor.config().max_concurrent, 8);
    }

    #[test]
    fn request_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.json");
        std::fs::write(&path, r#"{"code":"function f(){}","functionName":"f"}"#).unwrap();
        let body = read_request(Some(&path)).unwrap();
        assert!(body.contains("functionName"));
    }
}
