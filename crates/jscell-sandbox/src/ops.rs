//! deno_core op definitions for the jscell sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function pointers,
//! metadata structs) that cannot carry doc comments. We suppress `missing_docs`
//! at the module level; all actual functions and types are documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;
use serde::Serialize;

use crate::bridge::BRIDGE_POLL_INTERVAL;
use crate::bridge::BridgeTable;
use crate::capabilities::{ClassBinding, HostRuntime, HostTokens};
use crate::host::{self, HostRequest};
use crate::HttpClient;

/// Serialized outcome reported by the harness, stored in OpState.
///
/// Written at most once per isolate.
pub struct InvocationOutcome(pub String);

const JS_TARGET: &str = "jscell::sandbox::js";

fn network_disabled() -> JsErrorBox {
    JsErrorBox::generic("restricted operation: network access is disabled in this sandbox")
}

fn unknown_handle(id: u32) -> JsErrorBox {
    JsErrorBox::generic(format!("unknown bridge handle {id}"))
}

/// Aborts a spawned host task when the op awaiting it is dropped with the isolate.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn http_client(state: &OpState) -> Result<Arc<dyn HttpClient>, JsErrorBox> {
    state
        .try_borrow::<Arc<dyn HttpClient>>()
        .cloned()
        .ok_or_else(network_disabled)
}

fn parse_request(json: &str) -> Result<HostRequest, JsErrorBox> {
    serde_json::from_str(json)
        .map_err(|e| JsErrorBox::type_error(format!("invalid request options: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsErrorBox> {
    serde_json::to_string(value)
        .map_err(|e| JsErrorBox::generic(format!("result serialization failed: {e}")))
}

/// Forward a console message from sandbox code.
#[op2(fast)]
pub fn op_jscell_log(#[string] level: &str, #[string] msg: &str) {
    match level {
        "error" => tracing::error!(target: JS_TARGET, sandbox = true, "{}", msg),
        "warn" => tracing::warn!(target: JS_TARGET, sandbox = true, "{}", msg),
        "debug" => tracing::debug!(target: JS_TARGET, sandbox = true, "{}", msg),
        _ => tracing::info!(target: JS_TARGET, sandbox = true, "{}", msg),
    }
}

/// Record the invocation outcome. Later reports are ignored.
#[op2(fast)]
pub fn op_jscell_set_result(state: &mut OpState, #[string] json: &str) {
    if state.has::<InvocationOutcome>() {
        tracing::warn!("invocation outcome reported twice, keeping the first");
        return;
    }
    state.put(InvocationOutcome(json.to_string()));
}

/// Sleep for `millis`, backing the timer bindings.
#[op2(async)]
pub async fn op_jscell_sleep(#[smi] millis: u32) {
    tokio::time::sleep(Duration::from_millis(millis.into())).await;
}

/// `fetch()`: send one request on the host runtime, any status is a response.
#[op2(async)]
#[string]
pub async fn op_jscell_fetch(
    op_state: Rc<RefCell<OpState>>,
    #[string] request_json: String,
) -> Result<String, JsErrorBox> {
    let (http, runtime) = {
        let st = op_state.borrow();
        (http_client(&st)?, st.borrow::<HostRuntime>().0.clone())
    };
    let request = parse_request(&request_json)?;

    tracing::debug!(method = %request.method, url = %request.url, "fetch dispatched");

    let task = runtime.spawn(host::authorized_send(http, None, None, request));
    let _abort = AbortOnDrop(task.abort_handle());
    let response = task
        .await
        .map_err(|e| JsErrorBox::generic(format!("fetch task failed: {e}")))?
        .map_err(|e| JsErrorBox::generic(e.to_string()))?;

    to_json(&response)
}

/// Start a bridged host call and return its handle id without blocking.
///
/// `rest_client` calls carry a bearer credential for `tenant` and treat a
/// non-2xx status as a failure; XMLHttpRequest calls do neither.
#[op2(fast)]
#[smi]
pub fn op_jscell_bridge_start(
    state: &mut OpState,
    #[string] request_json: &str,
    #[string] tenant: &str,
    rest_client: bool,
) -> Result<u32, JsErrorBox> {
    let http = http_client(state)?;
    let request = parse_request(request_json)?;
    let tokens = if rest_client {
        state.try_borrow::<HostTokens>().and_then(|t| t.0.clone())
    } else {
        None
    };
    let tenant = (!tenant.is_empty()).then(|| tenant.to_string());

    let id = state.borrow_mut::<BridgeTable>().start(async move {
        if rest_client {
            host::authorized_call(http, tokens, tenant, request).await
        } else {
            host::authorized_send(http, None, None, request).await
        }
    });
    tracing::debug!(handle = id, rest_client, "bridge handle started");
    Ok(id)
}

/// Block until handle `id` is terminal and return its state as JSON.
#[op2]
#[string]
pub fn op_jscell_bridge_resolve(state: &mut OpState, #[smi] id: u32) -> Result<String, JsErrorBox> {
    let handle = state
        .borrow_mut::<BridgeTable>()
        .get_mut(id)
        .ok_or_else(|| unknown_handle(id))?;
    to_json(handle.wait_blocking(BRIDGE_POLL_INTERVAL))
}

/// Await handle `id` without blocking the isolate thread.
#[op2(async)]
#[string]
pub async fn op_jscell_bridge_settle(
    op_state: Rc<RefCell<OpState>>,
    #[smi] id: u32,
) -> Result<String, JsErrorBox> {
    loop {
        {
            let mut st = op_state.borrow_mut();
            let handle = st
                .borrow_mut::<BridgeTable>()
                .get_mut(id)
                .ok_or_else(|| unknown_handle(id))?;
            let outcome = handle.poll_once();
            if outcome.is_terminal() {
                return to_json(outcome);
            }
        }
        tokio::time::sleep(BRIDGE_POLL_INTERVAL).await;
    }
}

/// Components of a parsed URL, as exposed on the sandbox `URL` object.
#[derive(Debug, Serialize, PartialEq)]
pub struct UrlParts {
    pub href: String,
    pub origin: String,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

/// Parse `href`, resolving against `base` when it is non-empty.
pub fn parse_url(href: &str, base: &str) -> Result<UrlParts, url::ParseError> {
    let url = if base.is_empty() {
        url::Url::parse(href)?
    } else {
        url::Url::parse(base)?.join(href)?
    };
    let hostname = url.host_str().unwrap_or_default().to_string();
    let port = url.port().map(|p| p.to_string()).unwrap_or_default();
    let host = if port.is_empty() {
        hostname.clone()
    } else {
        format!("{hostname}:{port}")
    };
    Ok(UrlParts {
        href: url.as_str().to_string(),
        origin: url.origin().ascii_serialization(),
        protocol: format!("{}:", url.scheme()),
        username: url.username().to_string(),
        password: url.password().unwrap_or_default().to_string(),
        host,
        hostname,
        port,
        pathname: url.path().to_string(),
        search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
        hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
    })
}

/// Back the sandbox `URL` constructor.
#[op2]
#[string]
pub fn op_jscell_url_parse(#[string] href: &str, #[string] base: &str) -> Result<String, JsErrorBox> {
    let parts = parse_url(href, base)
        .map_err(|e| JsErrorBox::type_error(format!("Invalid URL '{href}': {e}")))?;
    to_json(&parts)
}

/// Resolve a `Java.type()` name through the class table.
#[op2]
#[string]
pub fn op_jscell_class_lookup(#[string] name: &str) -> String {
    let binding = ClassBinding::lookup(name);
    if binding == ClassBinding::Unknown {
        tracing::warn!(class = %name, "unknown class requested, returning inert placeholder");
    }
    binding.as_str().to_string()
}

deno_core::extension!(
    jscell_ext,
    ops = [
        op_jscell_log,
        op_jscell_set_result,
        op_jscell_sleep,
        op_jscell_fetch,
        op_jscell_bridge_start,
        op_jscell_bridge_resolve,
        op_jscell_bridge_settle,
        op_jscell_url_parse,
        op_jscell_class_lookup
    ],
);
