//! Sandbox executor: creates a fresh V8 isolate per invocation and runs the
//! generated harness in it.
//!
//! Each invocation gets a brand new runtime. No state leaks between calls.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. Host network calls are
//! spawned back onto the caller's runtime so they keep making progress while
//! the isolate thread is blocked in a bridge coercion. The public API is
//! fully async and `Send`-safe.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::audit::{AuditEntryBuilder, AuditLogger, AuditingHttpClient, HostCallAudit, NoopAuditLogger};
use crate::capabilities::{CapabilitySet, HostBindings};
use crate::classify::classify;
use crate::error::SandboxError;
use crate::harness::{Harness, DEFAULT_BUNDLED_CODE_THRESHOLD};
use crate::legacy::apply_rest_call_await;
use crate::normalize::normalize;
use crate::ops::{jscell_ext, InvocationOutcome};
use crate::request::{elapsed_millis, ExecutionFailure, ExecutionRequest, ExecutionResult};
use crate::validator::{validate_request, DEFAULT_MAX_CODE_SIZE};
use crate::{HttpClient, TokenFetcher};

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget for one isolate.
    pub timeout: Duration,
    /// Maximum size of submitted code (and of the serialized arguments) in bytes.
    pub max_code_size: usize,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum live isolates; further requests wait for a slot.
    pub max_concurrent: usize,
    /// Size above which module-free code counts as pre-bundled.
    pub bundled_code_threshold: usize,
    /// Run the legacy REST client auto-await pass.
    pub legacy_rest_await: bool,
    /// Bindings exposed to every isolate.
    pub capabilities: CapabilitySet,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_concurrent: 8,
            bundled_code_threshold: DEFAULT_BUNDLED_CODE_THRESHOLD,
            legacy_rest_await: true,
            capabilities: CapabilitySet::default(),
        }
    }
}

impl SandboxConfig {
    /// Total time, from isolate start, that bridged waits may use across all
    /// handles: 80% of the isolate timeout.
    pub fn bridge_budget(&self) -> Duration {
        self.timeout.mul_f64(0.8)
    }

    /// Bridge ceiling actually used per call: the configured value, held to
    /// at most [`bridge_budget`](Self::bridge_budget).
    pub fn bridge_ceiling(&self) -> Duration {
        self.capabilities.bridge_timeout.min(self.bridge_budget())
    }

    fn effective_capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            bridge_timeout: self.bridge_ceiling(),
            ..self.capabilities.clone()
        }
    }
}

/// Engine stages, logged at `debug` as an invocation moves through them.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Validating,
    Normalizing,
    Constructing,
    Running,
    Succeeded,
    Failed,
}

fn enter(stage: Stage) {
    tracing::debug!(stage = ?stage, "stage");
}

/// The sandbox executor. Creates fresh V8 isolates for each invocation.
///
/// This is `Send + Sync` safe: all V8 operations are dispatched to a
/// dedicated thread internally. A semaphore bounds the number of
/// simultaneous isolates.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
    http: Option<Arc<dyn HttpClient>>,
    tokens: Option<Arc<dyn TokenFetcher>>,
    audit_logger: Arc<dyn AuditLogger>,
}

impl SandboxExecutor {
    /// Create an executor with no network client, no credentials, and no auditing.
    pub fn new(config: SandboxConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            semaphore,
            http: None,
            tokens: None,
            audit_logger: Arc::new(NoopAuditLogger),
        }
    }

    /// Use `client` for sandbox network bindings.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    /// Attach bearer credentials from `tokens` to REST client calls.
    pub fn with_token_fetcher(mut self, tokens: Arc<dyn TokenFetcher>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Emit one audit entry per invocation to `logger`.
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit_logger = logger;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one invocation to a value or a classified failure.
    ///
    /// Must be called from within a tokio runtime; host network calls made by
    /// the sandbox are spawned on it.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        let start = Instant::now();
        let mut audit = AuditEntryBuilder::new(&request.code, &request.function_name);
        let span = tracing::debug_span!(
            "execute",
            execution_id = %audit.execution_id(),
            function = %request.function_name,
        );

        let result = self
            .run(&request, &mut audit, start)
            .instrument(span.clone())
            .await
            .map_err(|e| classify(e, &request.function_name, start.elapsed()));

        span.in_scope(|| match &result {
            Ok(r) => {
                enter(Stage::Succeeded);
                tracing::info!(elapsed_ms = r.elapsed_millis, "execute: complete");
            }
            Err(f) => {
                enter(Stage::Failed);
                tracing::warn!(
                    category = %f.category,
                    elapsed_ms = f.elapsed_millis,
                    error = %f.message,
                    "execute: failed"
                );
            }
        });

        let entry = audit.finish(&result);
        self.audit_logger.log(&entry).await;

        result
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        audit: &mut AuditEntryBuilder,
        start: Instant,
    ) -> Result<ExecutionResult, SandboxError> {
        enter(Stage::Validating);
        validate_request(request, Some(self.config.max_code_size))?;

        enter(Stage::Normalizing);
        let normalized = normalize(&request.code);
        let code = if self.config.legacy_rest_await {
            apply_rest_call_await(&normalized, &request.function_name)
        } else {
            Cow::Borrowed(normalized.as_str())
        };
        let harness = Harness::build(
            &code,
            &request.function_name,
            &request.arguments,
            request.skip_default_wrapper,
            self.config.bundled_code_threshold,
        )?;
        audit.harness_shape(harness.shape.as_str());
        tracing::debug!(shape = harness.shape.as_str(), script_len = harness.script.len(), "harness built");

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("executor is shut down")))?;

        let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel::<HostCallAudit>();
        let http = self.http.clone().map(|inner| {
            Arc::new(AuditingHttpClient::new(inner, audit_tx)) as Arc<dyn HttpClient>
        });
        let bindings = HostBindings {
            http,
            tokens: self.tokens.clone(),
            runtime: Handle::current(),
        };

        let value = self
            .run_in_isolate(harness.script, bindings, &request.function_name)
            .await;

        while let Ok(call) = audit_rx.try_recv() {
            audit.record_host_call(call);
        }

        Ok(ExecutionResult {
            value: value?,
            elapsed_millis: elapsed_millis(start.elapsed()),
        })
    }

    /// Spawn a dedicated thread with its own V8 isolate and wait for it.
    async fn run_in_isolate(
        &self,
        script: String,
        bindings: HostBindings,
        function_name: &str,
    ) -> Result<Option<Value>, SandboxError> {
        let config = self.config.clone();
        let function_name = function_name.to_string();
        let span = tracing::Span::current();

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name("jscell-isolate".into())
            .spawn(move || {
                let _entered = span.enter();
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                            tracing::warn!("sandbox result receiver dropped");
                        }
                        return;
                    }
                };
                let result = rt.block_on(run_invocation(&config, script, bindings, &function_name));
                if tx.send(result).is_err() {
                    tracing::warn!("sandbox result receiver dropped before result was sent");
                }
            })
            .map_err(|e| SandboxError::Execution(e.into()))?;

        rx.await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")))?
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. AtomicBool so the callback
    /// only needs a shared reference.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `HeapLimitState` boxed in `run_harness`,
    // which removes this callback before the box is dropped.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Build, bootstrap, and run one isolate on the current thread.
///
/// Must be called from a dedicated thread, not the caller's runtime.
async fn run_invocation(
    config: &SandboxConfig,
    script: String,
    bindings: HostBindings,
    function_name: &str,
) -> Result<Option<Value>, SandboxError> {
    enter(Stage::Constructing);
    let bridge_deadline = Instant::now() + config.bridge_budget();
    let capabilities = config.effective_capabilities();
    let mut runtime = create_runtime(config.max_heap_size);
    {
        let op_state = runtime.op_state();
        capabilities.install(&mut op_state.borrow_mut(), bindings, bridge_deadline);
    }
    runtime
        .execute_script("[jscell:bootstrap]", capabilities.bootstrap_script())
        .map_err(|e| SandboxError::Setup {
            message: e.to_string(),
        })?;

    enter(Stage::Running);
    run_harness(&mut runtime, script, config, function_name).await
}

/// Create a fresh JsRuntime with the jscell extension loaded and V8 heap limits set.
fn create_runtime(max_heap_size: usize) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);
    JsRuntime::new(RuntimeOptions {
        extensions: vec![jscell_ext::init_ops_and_esm()],
        create_params: Some(create_params),
        ..Default::default()
    })
}

/// Poll the event loop until the harness reports or the loop drains.
///
/// Returning on the report means pending timers or intervals do not hold the
/// result hostage.
async fn drive_until_reported(runtime: &mut JsRuntime) -> Result<(), String> {
    std::future::poll_fn(|cx| {
        let poll = runtime.poll_event_loop(cx, PollEventLoopOptions::default());
        if runtime.op_state().borrow().has::<InvocationOutcome>() {
            return Poll::Ready(Ok(()));
        }
        poll.map(|r| r.map_err(|e| e.to_string()))
    })
    .await
}

/// Run the harness under the CPU watchdog and heap callback, then read the
/// reported outcome.
async fn run_harness(
    runtime: &mut JsRuntime,
    script: String,
    config: &SandboxConfig,
    function_name: &str,
) -> Result<Option<Value>, SandboxError> {
    let started = Instant::now();

    // --- Heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- CPU watchdog ---
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let timeout = config.timeout;
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();

    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    // --- Run ---
    let exec_error = match runtime.execute_script("[jscell:harness]", script) {
        Ok(_) => match tokio::time::timeout(timeout, drive_until_reported(runtime)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => {
                timed_out.store(true, Ordering::SeqCst);
                None
            }
        },
        Err(e) => Some(e.to_string()),
    };
    let elapsed = started.elapsed();

    // --- Cleanup: the watchdog must be gone before the isolate is dropped ---
    let _ = cancel_tx.send(());
    let _ = watchdog.join();
    runtime
        .v8_isolate()
        .remove_near_heap_limit_callback(near_heap_limit_callback, 0);

    // --- Causes in priority order ---
    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded);
    }

    if timed_out.load(Ordering::SeqCst) {
        let failure = classify(
            SandboxError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            function_name,
            elapsed,
        );
        return Err(SandboxError::Classified(failure));
    }

    let reported = runtime
        .op_state()
        .borrow()
        .try_borrow::<InvocationOutcome>()
        .map(|o| o.0.clone());

    match (reported, exec_error) {
        (Some(json), _) => parse_outcome(&json),
        (None, Some(message)) => Err(SandboxError::JsError { message }),
        (None, None) => Err(SandboxError::Unsettled),
    }
}

/// Decode the reporter's envelope: `{ok: v}`, `{}` (undefined), or
/// `{error: {name, message}}`.
fn parse_outcome(json: &str) -> Result<Option<Value>, SandboxError> {
    let envelope: Value = serde_json::from_str(json).map_err(|e| {
        SandboxError::Execution(anyhow::anyhow!("malformed invocation outcome: {e}"))
    })?;

    if let Some(error) = envelope.get("error") {
        let field = |key: &str| error.get(key).and_then(Value::as_str).map(str::to_string);
        return Err(SandboxError::Thrown {
            name: field("name"),
            message: field("message"),
        });
    }

    Ok(envelope.get("ok").cloned())
}
