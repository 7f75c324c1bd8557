//! End-to-end invocation scenarios through the public executor API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jscell_sandbox::audit::{AuditEntry, AuditLogger, AuditOutcome};
use jscell_sandbox::{
    CapabilitySet, ExecutionRequest, FailureCategory, SandboxConfig, SandboxExecutor,
};
use serde_json::{json, Value};

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default())
}

async fn run(code: &str, name: &str, args: Vec<Value>) -> Option<Value> {
    executor()
        .execute(ExecutionRequest::new(code, name, args))
        .await
        .unwrap_or_else(|f| panic!("{name} failed: {f}"))
        .value
}

#[tokio::test]
async fn returns_objects_and_arrays() {
    let value = run(
        "function shape(n){ return { n, items: Array.from({length: n}, (_, i) => i * i) }; }",
        "shape",
        vec![json!(4)],
    )
    .await;
    assert_eq!(value, Some(json!({"n": 4, "items": [0, 1, 4, 9]})));
}

#[tokio::test]
async fn arguments_arrive_as_json_values() {
    let value = run(
        "function echo(a, b, c){ return [typeof a, typeof b, Array.isArray(c)]; }",
        "echo",
        vec![json!("s"), json!({"k": 1}), json!([1, 2])],
    )
    .await;
    assert_eq!(value, Some(json!(["string", "object", true])));
}

#[tokio::test]
async fn arrow_function_bindings_are_callable() {
    let value = run("const triple = (x) => x * 3;", "triple", vec![json!(7)]).await;
    assert_eq!(value, Some(json!(21)));
}

#[tokio::test]
async fn named_export_is_stripped() {
    let value = run(
        "export function greet(who){ return `hi ${who}`; }",
        "greet",
        vec![json!("ada")],
    )
    .await;
    assert_eq!(value, Some(json!("hi ada")));
}

#[tokio::test]
async fn skip_wrapper_runs_top_level_code_once() {
    let code = "let calls = 0; function counter(){ calls += 1; return calls; }";
    let result = executor()
        .execute(ExecutionRequest::new(code, "counter", vec![]).skip_default_wrapper(true))
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!(1)));
}

#[tokio::test]
async fn result_is_taken_before_pending_timers_fire() {
    let start = std::time::Instant::now();
    let value = run(
        "function quick(){ setTimeout(() => {}, 60000); return 'done'; }",
        "quick",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!("done")));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn timers_drive_async_results() {
    let value = run(
        r#"async function later(){
            const order = [];
            await new Promise((resolve) => setTimeout(() => { order.push("timeout"); resolve(); }, 20));
            let ticks = 0;
            await new Promise((resolve) => {
                const id = setInterval(() => {
                    ticks += 1;
                    if (ticks === 3) { clearInterval(id); resolve(); }
                }, 5);
            });
            order.push(ticks);
            return order;
        }"#,
        "later",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!(["timeout", 3])));
}

#[tokio::test]
async fn cleared_timeout_never_fires() {
    let value = run(
        r#"async function f(){
            let fired = false;
            const id = setTimeout(() => { fired = true; }, 5);
            clearTimeout(id);
            await new Promise((r) => setTimeout(r, 30));
            return fired;
        }"#,
        "f",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!(false)));
}

#[tokio::test]
async fn console_is_available() {
    let value = run(
        "function f(){ console.log('a', {b: 1}); console.warn('w'); console.error(new Error('e')); return 1; }",
        "f",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!(1)));
}

#[tokio::test]
async fn url_and_search_params() {
    let value = run(
        r#"function parts(){
            const u = new URL("/v1/items?q=rust&page=2#top", "https://api.example.com:8443/base");
            const p = new URLSearchParams({ a: "1 2", b: "x&y" });
            p.append("a", "3");
            return {
                host: u.host, path: u.pathname, q: u.searchParams.get("q"),
                hash: u.hash, all: p.getAll("a"), encoded: p.toString(),
                bad: URL.canParse("not a url"),
            };
        }"#,
        "parts",
        vec![],
    )
    .await;
    assert_eq!(
        value,
        Some(json!({
            "host": "api.example.com:8443",
            "path": "/v1/items",
            "q": "rust",
            "hash": "#top",
            "all": ["1 2", "3"],
            "encoded": "a=1+2&b=x%26y&a=3",
            "bad": false,
        }))
    );
}

#[tokio::test]
async fn invalid_url_is_a_runtime_error() {
    let failure = executor()
        .execute(ExecutionRequest::new(
            "function f(){ return new URL('relative/only').href; }",
            "f",
            vec![],
        ))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::RuntimeError);
    assert!(failure.message.contains("Invalid URL"), "{}", failure.message);
}

#[tokio::test]
async fn process_env_reflects_environment() {
    let config = SandboxConfig {
        capabilities: CapabilitySet {
            environment: "staging".into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let result = SandboxExecutor::new(config)
        .execute(ExecutionRequest::new(
            "function env(){ return process.env.NODE_ENV; }",
            "env",
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!("staging")));
}

#[tokio::test]
async fn next_tick_runs_before_result() {
    let value = run(
        r#"async function f(){
            let seen = 0;
            await new Promise((resolve) => process.nextTick((n) => { seen = n; resolve(); }, 9));
            return seen;
        }"#,
        "f",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!(9)));
}

#[tokio::test]
async fn unknown_class_is_an_inert_placeholder() {
    let value = run(
        r#"function f(){
            const Thing = Java.type("com.example.Missing");
            return typeof new Thing();
        }"#,
        "f",
        vec![],
    )
    .await;
    assert_eq!(value, Some(json!("object")));
}

#[tokio::test]
async fn console_disabled_is_silent() {
    let config = SandboxConfig {
        capabilities: CapabilitySet {
            allow_console: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let result = SandboxExecutor::new(config)
        .execute(ExecutionRequest::new(
            "function f(){ console.log('dropped'); return 'ok'; }",
            "f",
            vec![],
        ))
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!("ok")));
}

#[tokio::test]
async fn timers_disabled_is_restricted() {
    let config = SandboxConfig {
        capabilities: CapabilitySet {
            allow_timers: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let failure = SandboxExecutor::new(config)
        .execute(ExecutionRequest::new(
            "function f(){ setTimeout(() => {}, 1); }",
            "f",
            vec![],
        ))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::RestrictedOperation);
}

#[tokio::test]
async fn non_serializable_result_is_runtime_error() {
    let failure = executor()
        .execute(ExecutionRequest::new(
            "function f(){ const o = {}; o.self = o; return o; }",
            "f",
            vec![],
        ))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::RuntimeError);
    assert!(failure.message.contains("not JSON-serializable"), "{}", failure.message);
}

#[tokio::test]
async fn oversized_code_is_validation() {
    let config = SandboxConfig {
        max_code_size: 64,
        ..Default::default()
    };
    let code = format!("function f(){{ return '{}'; }}", "x".repeat(200));
    let failure = SandboxExecutor::new(config)
        .execute(ExecutionRequest::new(code, "f", vec![]))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::Validation);
}

#[tokio::test]
async fn empty_code_is_validation() {
    let failure = executor()
        .execute(ExecutionRequest::new("   \n", "f", vec![]))
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::Validation);
}

/// Collects audit entries in memory.
#[derive(Default)]
struct CapturingAudit(Mutex<Vec<AuditEntry>>);

#[async_trait::async_trait]
impl AuditLogger for CapturingAudit {
    async fn log(&self, entry: &AuditEntry) {
        self.0.lock().unwrap().push(entry.clone());
    }
}

#[tokio::test]
async fn every_invocation_is_audited() {
    let audit = Arc::new(CapturingAudit::default());
    let exec = executor().with_audit_logger(audit.clone());

    exec.execute(ExecutionRequest::new("function ok(){ return [1,2]; }", "ok", vec![]))
        .await
        .unwrap();
    exec.execute(ExecutionRequest::new("function ok(){}", "missing", vec![]))
        .await
        .unwrap_err();

    let entries = audit.0.lock().unwrap();
    assert_eq!(entries.len(), 2);

    assert!(matches!(entries[0].outcome, AuditOutcome::Success));
    assert_eq!(entries[0].function_name, "ok");
    assert_eq!(entries[0].harness_shape, Some("wrapped"));
    assert_eq!(entries[0].code_hash.len(), 64);
    assert_ne!(entries[0].execution_id, entries[1].execution_id);

    match &entries[1].outcome {
        AuditOutcome::Failure { category, .. } => {
            assert_eq!(*category, FailureCategory::FunctionNotFound)
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

/// Module-free source well past the bundled threshold, shaped like an IIFE bundle.
fn bundle(exported: &str) -> String {
    let table: String = (0..5000).map(|i| format!("{i},")).collect();
    format!(
        r#"var {exported} = (function () {{
    var table = [{table}];
    function lookup(i) {{ return table[i]; }}
    return function (i, scale) {{ return {{ value: lookup(i) * scale }}; }};
}})();"#
    )
}

#[tokio::test]
async fn bundled_code_runs_through_the_bundled_harness() {
    let audit = Arc::new(CapturingAudit::default());
    let exec = executor().with_audit_logger(audit.clone());
    let code = bundle("transform");
    assert!(code.len() > SandboxConfig::default().bundled_code_threshold);

    let result = exec
        .execute(
            ExecutionRequest::new(code, "transform", vec![json!(1234), json!(2)])
                .skip_default_wrapper(true),
        )
        .await
        .unwrap();
    assert_eq!(result.value, Some(json!({"value": 2468})));

    let entries = audit.0.lock().unwrap();
    assert_eq!(entries[0].harness_shape, Some("bundled"));
}

#[tokio::test]
async fn bundled_code_without_the_function_is_not_found() {
    let failure = executor()
        .execute(
            ExecutionRequest::new(bundle("transform"), "render", vec![])
                .skip_default_wrapper(true),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.category, FailureCategory::FunctionNotFound);
}
