#![warn(missing_docs)]

//! # jscell-sandbox
//!
//! Runs one named function from caller-supplied JavaScript inside a fresh
//! deno_core isolate and returns its value or a classified failure.
//!
//! ## Pipeline
//!
//! validate → normalize → legacy pass → harness → isolate (capability set,
//! watchdog, heap limit) → classify
//!
//! ## Security model
//!
//! - **Fresh isolate per call**: nothing survives between invocations
//! - **Fixed capability set**: fetch, legacy HTTP, console, timers, URL,
//!   a class-loader mock, `process.env.NODE_ENV`; no fs, no modules, no env
//! - **Opaque credentials**: bearer tokens are attached host-side after the
//!   request leaves the isolate
//! - **Hard timeout**: the watchdog terminates the isolate even if code never
//!   yields
//! - **Caller-safe messages**: failures are redacted before they leave the crate

pub mod audit;
pub mod bridge;
pub mod capabilities;
pub mod classify;
pub mod error;
pub mod executor;
pub mod harness;
pub mod host;
pub mod legacy;
pub mod normalize;
pub mod ops;
pub mod redact;
pub mod request;
pub mod service;
pub mod validator;

pub use capabilities::CapabilitySet;
pub use error::SandboxError;
pub use executor::{SandboxConfig, SandboxExecutor};
pub use host::{HostRequest, HostResponse};
pub use request::{
    ExecutionFailure, ExecutionRequest, ExecutionResponse, ExecutionResult, FailureCategory,
};

/// Outbound HTTP for sandbox network bindings.
///
/// Implementations own connection handling. Sandbox code only ever sees the
/// [`HostResponse`] this returns.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Send one request. A non-2xx status is a successful send.
    async fn send(&self, request: HostRequest) -> Result<HostResponse, jscell_error::HostError>;
}

/// Source of bearer credentials for bridged host calls.
#[async_trait::async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Fetch a bearer token, optionally scoped to a tenant.
    async fn fetch_bearer_token(
        &self,
        tenant: Option<&str>,
    ) -> Result<String, jscell_error::TokenError>;
}
