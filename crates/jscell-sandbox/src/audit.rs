//! Audit logging for sandbox executions.
//!
//! Every execution emits an [`AuditEntry`] containing:
//! - Execution ID (UUID)
//! - SHA-256 hash of the code (never raw code in logs)
//! - A redacted preview of the first 500 chars of code
//! - Host network calls made (with hashed URLs, not raw)
//! - Elapsed time and classified outcome
//!
//! The [`AuditLogger`] trait allows pluggable backends.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::host::{HostRequest, HostResponse};
use crate::request::{ExecutionFailure, ExecutionResult, FailureCategory};

/// Maximum length of the code preview in audit entries.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for a single invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Unique execution identifier.
    pub execution_id: String,
    /// When execution started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hash of the submitted code.
    pub code_hash: String,
    /// Redacted first N characters of the code.
    pub code_preview: String,
    /// Function that was invoked.
    pub function_name: String,
    /// Harness template used, if the request got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness_shape: Option<&'static str>,
    /// Host network calls made during execution.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_calls: Vec<HostCallAudit>,
    /// Elapsed milliseconds reported to the caller.
    pub elapsed_millis: f64,
    /// Size of the serialized result in bytes.
    pub result_size_bytes: usize,
    /// Final outcome.
    pub outcome: AuditOutcome,
}

/// Audit record for one outbound host call.
#[derive(Debug, Clone, Serialize)]
pub struct HostCallAudit {
    /// HTTP method.
    pub method: String,
    /// SHA-256 of the request URL.
    pub url_hash: String,
    /// Response status, when one was received.
    pub status: Option<u16>,
    /// Call duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the call produced a response.
    pub success: bool,
}

/// The outcome of a sandbox execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The function returned.
    Success,
    /// The invocation failed.
    Failure {
        /// Classified category.
        category: FailureCategory,
        /// Caller-safe message.
        message: String,
    },
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &AuditEntry);
}

/// Compute the SHA-256 hash of a string, returned as a hex string.
pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Builder for constructing audit entries during execution.
pub struct AuditEntryBuilder {
    execution_id: String,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    function_name: String,
    harness_shape: Option<&'static str>,
    host_calls: Vec<HostCallAudit>,
}

impl AuditEntryBuilder {
    /// Start building an audit entry for an invocation.
    pub fn new(code: &str, function_name: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code),
            code_preview: crate::redact::code_preview(code, CODE_PREVIEW_MAX),
            function_name: function_name.to_string(),
            harness_shape: None,
            host_calls: Vec::new(),
        }
    }

    /// The generated execution id, for correlating stage logs.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Record the harness template chosen.
    pub fn harness_shape(&mut self, shape: &'static str) {
        self.harness_shape = Some(shape);
    }

    /// Record a host call.
    pub fn record_host_call(&mut self, audit: HostCallAudit) {
        self.host_calls.push(audit);
    }

    /// Finalize the audit entry with the classified result.
    pub fn finish(self, result: &Result<ExecutionResult, ExecutionFailure>) -> AuditEntry {
        let (elapsed_millis, result_size_bytes, outcome) = match result {
            Ok(r) => {
                let size = r
                    .value
                    .as_ref()
                    .and_then(|v| serde_json::to_string(v).ok())
                    .map_or(0, |s| s.len());
                (r.elapsed_millis, size, AuditOutcome::Success)
            }
            Err(f) => (
                f.elapsed_millis,
                0,
                AuditOutcome::Failure {
                    category: f.category,
                    message: f.message.clone(),
                },
            ),
        };

        AuditEntry {
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            function_name: self.function_name,
            harness_shape: self.harness_shape,
            host_calls: self.host_calls,
            elapsed_millis,
            result_size_bytes,
            outcome,
        }
    }
}

/// A no-op audit logger for when auditing is not needed.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &AuditEntry) {}
}

/// Emits audit entries as `tracing` events at `INFO` with `audit = true`.
///
/// Use `RUST_LOG=jscell=info` to capture them.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &AuditEntry) {
        let (outcome, category) = match &entry.outcome {
            AuditOutcome::Success => ("success", None),
            AuditOutcome::Failure { category, .. } => ("failure", Some(category.as_str())),
        };
        tracing::info!(
            audit = true,
            execution_id = %entry.execution_id,
            function = %entry.function_name,
            harness = entry.harness_shape.unwrap_or("none"),
            code_hash = %entry.code_hash,
            elapsed_ms = entry.elapsed_millis,
            result_size_bytes = entry.result_size_bytes,
            host_calls = entry.host_calls.len(),
            outcome = outcome,
            category = category.unwrap_or("none"),
            "audit"
        );
    }
}

/// An [`HttpClient`](crate::HttpClient) wrapper that reports every call.
pub struct AuditingHttpClient {
    inner: Arc<dyn crate::HttpClient>,
    audit_tx: tokio::sync::mpsc::UnboundedSender<HostCallAudit>,
}

impl AuditingHttpClient {
    /// Wrap `inner`, sending one [`HostCallAudit`] per call to `audit_tx`.
    pub fn new(
        inner: Arc<dyn crate::HttpClient>,
        audit_tx: tokio::sync::mpsc::UnboundedSender<HostCallAudit>,
    ) -> Self {
        Self { inner, audit_tx }
    }
}

#[async_trait::async_trait]
impl crate::HttpClient for AuditingHttpClient {
    async fn send(
        &self,
        request: HostRequest,
    ) -> Result<HostResponse, jscell_error::HostError> {
        let method = request.method.clone();
        let url_hash = sha256_hex(&request.url);
        let start = Instant::now();
        let result = self.inner.send(request).await;
        let audit = HostCallAudit {
            method,
            url_hash,
            status: result.as_ref().ok().map(|r| r.status),
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.is_ok(),
        };
        // Receiver gone means the execution already finished.
        let _ = self.audit_tx.send(audit);
        result
    }
}
