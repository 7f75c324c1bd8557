//! The fixed set of host bindings an isolate can reach.
//!
//! A [`CapabilitySet`] is built once per request from configuration and is
//! the only input to bootstrap: it decides which globals are real, which are
//! denial stubs, and which host collaborators land in `OpState`.
//!
//! Bindings: `fetch`, `XMLHttpRequest`, `console`, timers, `URL`,
//! `URLSearchParams`, `Java.type` (class-loader mock), `process`, and
//! `document` (present, bound to `undefined`). `Deno`, `eval`, the global
//! `Function`, and the `.constructor` links that reach the function
//! constructors are removed once bootstrap is done.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deno_core::OpState;
use tokio::runtime::Handle;

use crate::bridge::BridgeTable;
use crate::legacy::REST_CLIENT_CLASS;
use crate::{HttpClient, TokenFetcher};

/// Per-request capability toggles and values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    /// Network bindings are live. When off they throw `restricted operation`.
    pub allow_http: bool,
    /// Console forwards to host logging. When off it is a silent no-op.
    pub allow_console: bool,
    /// Timer functions are live. When off they throw `restricted operation`.
    pub allow_timers: bool,
    /// Value of `process.env.NODE_ENV`.
    pub environment: String,
    /// Ceiling for one bridge handle to reach a terminal state.
    pub bridge_timeout: Duration,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            allow_http: true,
            allow_console: true,
            allow_timers: true,
            environment: "production".to_string(),
            bridge_timeout: Duration::from_secs(4),
        }
    }
}

/// What `Java.type(name)` resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassBinding {
    /// The bridge-producing REST client constructor.
    RestClient,
    /// Any other name: an inert placeholder constructor.
    Unknown,
}

/// Qualified class names the loader recognises.
const CLASS_TABLE: &[(&str, ClassBinding)] = &[(REST_CLIENT_CLASS, ClassBinding::RestClient)];

impl ClassBinding {
    /// Resolve a fully-qualified class name.
    pub fn lookup(name: &str) -> Self {
        CLASS_TABLE
            .iter()
            .find(|(qualified, _)| *qualified == name)
            .map_or(Self::Unknown, |(_, binding)| *binding)
    }

    /// Tag understood by the bootstrap script.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestClient => "rest_client",
            Self::Unknown => "unknown",
        }
    }
}

/// Host runtime that bridged and fetched network calls are spawned on.
pub struct HostRuntime(pub Handle);

/// Token source for REST client calls, if one is configured.
pub struct HostTokens(pub Option<Arc<dyn TokenFetcher>>);

/// Host collaborators handed to [`CapabilitySet::install`].
pub struct HostBindings {
    /// Outbound HTTP. Ignored when `allow_http` is off.
    pub http: Option<Arc<dyn HttpClient>>,
    /// Bearer credential source.
    pub tokens: Option<Arc<dyn TokenFetcher>>,
    /// Runtime for host-side network work.
    pub runtime: Handle,
}

impl CapabilitySet {
    /// Put host state for the enabled capabilities into `state`.
    ///
    /// With HTTP disabled no client is installed, so the network ops refuse
    /// even if sandbox code reaches them some other way. Bridged waits end at
    /// `bridge_deadline` at the latest.
    pub fn install(&self, state: &mut OpState, bindings: HostBindings, bridge_deadline: Instant) {
        state.put(HostRuntime(bindings.runtime.clone()));
        state.put(BridgeTable::new(
            bindings.runtime,
            self.bridge_timeout,
            bridge_deadline,
        ));
        state.put(HostTokens(bindings.tokens));
        if self.allow_http {
            if let Some(http) = bindings.http {
                state.put(http);
            }
        }
    }

    /// Render the bootstrap script for this capability set.
    pub fn bootstrap_script(&self) -> String {
        let mut parts = Vec::new();

        parts.push(REPORTER_JS.to_string());

        parts.push(if self.allow_console {
            CONSOLE_JS.to_string()
        } else {
            CONSOLE_SILENT_JS.to_string()
        });

        parts.push(if self.allow_timers {
            TIMERS_JS.to_string()
        } else {
            TIMERS_DENIED_JS.to_string()
        });

        parts.push(URL_JS.to_string());
        parts.push(BRIDGE_HANDLE_JS.to_string());

        parts.push(if self.allow_http {
            NETWORK_JS.to_string()
        } else {
            NETWORK_DENIED_JS.to_string()
        });

        parts.push(CLASS_LOADER_JS.to_string());

        let environment = serde_json::to_string(&self.environment)
            .unwrap_or_else(|_| "\"production\"".to_string());
        parts.push(format!(
            r#"
    globalThis.process = Object.freeze({{
        env: Object.freeze({{ NODE_ENV: {environment} }}),
        nextTick: (fn, ...args) => {{ Promise.resolve().then(() => fn(...args)); }},
    }});
    Object.defineProperty(globalThis, "document", {{
        value: undefined, writable: false, enumerable: false, configurable: false,
    }});"#
        ));

        parts.push(HARDEN_JS.to_string());

        format!("((ops) => {{\n{}\n}})(Deno.core.ops);", parts.join("\n"))
    }
}

const REPORTER_JS: &str = r#"
    const setResult = ops.op_jscell_set_result;
    const restricted = (what) =>
        new Error(`restricted operation: ${what} is disabled in this sandbox`);
    const describe = (e) => {
        if (e instanceof Error) return { name: e.name, message: e.message };
        if (e === undefined || e === null) return { name: null, message: null };
        if (typeof e === "object") {
            return {
                name: typeof e.name === "string" ? e.name : null,
                message: typeof e.message === "string" ? e.message : null,
            };
        }
        return { name: null, message: String(e) };
    };
    const settle = (promise) => Promise.resolve(promise).then(
        (value) => {
            let json;
            try {
                json = value === undefined ? "{}" : JSON.stringify({ ok: value });
            } catch (e) {
                json = JSON.stringify({ error: {
                    name: "TypeError",
                    message: `return value is not JSON-serializable: ${e && e.message}`,
                } });
            }
            setResult(json);
        },
        (e) => setResult(JSON.stringify({ error: describe(e) })),
    );
    Object.defineProperty(globalThis, "__jscell", {
        value: Object.freeze({ settle }),
        writable: false, enumerable: false, configurable: false,
    });"#;

const CONSOLE_JS: &str = r#"
    const logOp = ops.op_jscell_log;
    const show = (a) => {
        if (typeof a === "string") return a;
        if (a instanceof Error) return `${a.name}: ${a.message}`;
        try {
            const s = JSON.stringify(a);
            return s === undefined ? String(a) : s;
        } catch (_) {
            return String(a);
        }
    };
    const emit = (level) => (...args) => logOp(level, args.map(show).join(" "));
    globalThis.console = Object.freeze({
        log: emit("info"), info: emit("info"), warn: emit("warn"),
        error: emit("error"), debug: emit("debug"), trace: emit("debug"),
    });"#;

const CONSOLE_SILENT_JS: &str = r#"
    const noop = () => {};
    globalThis.console = Object.freeze({
        log: noop, info: noop, warn: noop, error: noop, debug: noop, trace: noop,
    });"#;

const TIMERS_JS: &str = r#"
    const sleepOp = ops.op_jscell_sleep;
    const delayOf = (ms) => Math.min(Math.max(0, Math.floor(Number(ms) || 0)), 0x7fffffff);
    const activeTimers = new Set();
    let nextTimerId = 1;
    globalThis.setTimeout = (fn, ms, ...args) => {
        if (typeof fn !== "function") throw new TypeError("setTimeout callback must be a function");
        const id = nextTimerId++;
        activeTimers.add(id);
        sleepOp(delayOf(ms)).then(() => {
            if (activeTimers.delete(id)) fn(...args);
        });
        return id;
    };
    globalThis.setInterval = (fn, ms, ...args) => {
        if (typeof fn !== "function") throw new TypeError("setInterval callback must be a function");
        const id = nextTimerId++;
        const delay = Math.max(1, delayOf(ms));
        activeTimers.add(id);
        const tick = () => sleepOp(delay).then(() => {
            if (!activeTimers.has(id)) return;
            fn(...args);
            tick();
        });
        tick();
        return id;
    };
    globalThis.clearTimeout = (id) => { activeTimers.delete(id); };
    globalThis.clearInterval = (id) => { activeTimers.delete(id); };"#;

const TIMERS_DENIED_JS: &str = r#"
    for (const name of ["setTimeout", "setInterval", "clearTimeout", "clearInterval"]) {
        globalThis[name] = () => { throw restricted(name); };
    }"#;

const URL_JS: &str = r#"
    const urlParseOp = ops.op_jscell_url_parse;
    const formEncode = (s) => encodeURIComponent(s).replace(/%20/g, "+");
    const formDecode = (s) => decodeURIComponent(s.replace(/\+/g, " "));
    class URLSearchParams {
        #pairs = [];
        constructor(init) {
            if (init === undefined || init === null) return;
            if (typeof init === "string") {
                const text = init.startsWith("?") ? init.slice(1) : init;
                for (const piece of text.split("&")) {
                    if (piece === "") continue;
                    const eq = piece.indexOf("=");
                    const k = eq === -1 ? piece : piece.slice(0, eq);
                    const v = eq === -1 ? "" : piece.slice(eq + 1);
                    this.#pairs.push([formDecode(k), formDecode(v)]);
                }
            } else if (typeof init[Symbol.iterator] === "function") {
                for (const [k, v] of init) this.#pairs.push([String(k), String(v)]);
            } else {
                for (const k of Object.keys(init)) this.#pairs.push([k, String(init[k])]);
            }
        }
        append(k, v) { this.#pairs.push([String(k), String(v)]); }
        delete(k) { this.#pairs = this.#pairs.filter(([key]) => key !== String(k)); }
        get(k) { const p = this.#pairs.find(([key]) => key === String(k)); return p ? p[1] : null; }
        getAll(k) { return this.#pairs.filter(([key]) => key === String(k)).map(([, v]) => v); }
        has(k) { return this.#pairs.some(([key]) => key === String(k)); }
        set(k, v) {
            const key = String(k);
            const at = this.#pairs.findIndex(([existing]) => existing === key);
            if (at === -1) { this.#pairs.push([key, String(v)]); return; }
            this.#pairs[at][1] = String(v);
            this.#pairs = this.#pairs.filter(([existing], i) => i <= at || existing !== key);
        }
        sort() { this.#pairs.sort(([a], [b]) => (a < b ? -1 : a > b ? 1 : 0)); }
        forEach(fn, thisArg) { for (const [k, v] of this.#pairs) fn.call(thisArg, v, k, this); }
        keys() { return this.#pairs.map(([k]) => k)[Symbol.iterator](); }
        values() { return this.#pairs.map(([, v]) => v)[Symbol.iterator](); }
        entries() { return this.#pairs.map(([k, v]) => [k, v])[Symbol.iterator](); }
        [Symbol.iterator]() { return this.entries(); }
        get size() { return this.#pairs.length; }
        toString() { return this.#pairs.map(([k, v]) => `${formEncode(k)}=${formEncode(v)}`).join("&"); }
    }
    class URL {
        #parts;
        constructor(input, base) {
            const href = input instanceof URL ? input.href : String(input);
            const baseHref = base === undefined ? "" : (base instanceof URL ? base.href : String(base));
            this.#parts = JSON.parse(urlParseOp(href, baseHref));
        }
        static canParse(input, base) {
            try { new URL(input, base); return true; } catch (_) { return false; }
        }
        get href() { return this.#parts.href; }
        get origin() { return this.#parts.origin; }
        get protocol() { return this.#parts.protocol; }
        get username() { return this.#parts.username; }
        get password() { return this.#parts.password; }
        get host() { return this.#parts.host; }
        get hostname() { return this.#parts.hostname; }
        get port() { return this.#parts.port; }
        get pathname() { return this.#parts.pathname; }
        get search() { return this.#parts.search; }
        get hash() { return this.#parts.hash; }
        get searchParams() { return new URLSearchParams(this.#parts.search); }
        toString() { return this.#parts.href; }
        toJSON() { return this.#parts.href; }
    }
    globalThis.URL = URL;
    globalThis.URLSearchParams = URLSearchParams;
    const headerPairs = (headers) => {
        if (!headers) return [];
        if (typeof headers[Symbol.iterator] === "function") {
            return Array.from(headers, ([k, v]) => [String(k), String(v)]);
        }
        return Object.keys(headers).map((k) => [k, String(headers[k])]);
    };
    const bodyText = (body) => {
        if (body === undefined || body === null) return null;
        if (typeof body === "string") return body;
        if (body instanceof URLSearchParams) return body.toString();
        return JSON.stringify(body);
    };"#;

const BRIDGE_HANDLE_JS: &str = r#"
    const bridgeResolveOp = ops.op_jscell_bridge_resolve;
    const bridgeSettleOp = ops.op_jscell_bridge_settle;
    const bodyOf = (outcome) => {
        if (outcome.state === "resolved") return outcome.body;
        if (outcome.state === "timed_out") return "";
        throw new Error(outcome.message);
    };
    const bridgeHandle = (id) => {
        let cached = null;
        const force = () => {
            if (cached === null) cached = JSON.parse(bridgeResolveOp(id));
            return cached;
        };
        const settled = () => cached !== null
            ? Promise.resolve(cached)
            : bridgeSettleOp(id).then((json) => {
                if (cached === null) cached = JSON.parse(json);
                return cached;
            });
        const text = () => bodyOf(force());
        return Object.freeze({
            toString: text,
            valueOf: text,
            toJSON: text,
            [Symbol.toPrimitive]: text,
            then: (onResolved, onRejected) => settled().then(bodyOf).then(onResolved, onRejected),
            get status() {
                const outcome = force();
                return outcome.state === "resolved" ? outcome.status : 0;
            },
        });
    };"#;

const NETWORK_JS: &str = r#"
    const fetchOp = ops.op_jscell_fetch;
    const bridgeStartOp = ops.op_jscell_bridge_start;
    const makeHeaders = (pairs) => {
        const find = (name) => pairs.find(([k]) => k.toLowerCase() === String(name).toLowerCase());
        return Object.freeze({
            get: (name) => { const p = find(name); return p ? p[1] : null; },
            has: (name) => find(name) !== undefined,
            forEach: (fn) => pairs.forEach(([k, v]) => fn(v, k)),
            entries: () => pairs.map(([k, v]) => [k, v])[Symbol.iterator](),
        });
    };
    const makeResponse = (res, url) => Object.freeze({
        status: res.status,
        ok: res.status >= 200 && res.status < 300,
        statusText: "",
        url,
        headers: makeHeaders(res.headers),
        text: async () => res.body,
        json: async () => JSON.parse(res.body),
    });
    globalThis.fetch = async (input, init) => {
        const opts = init || {};
        const url = typeof input === "string" ? input
            : input instanceof URL ? input.href
            : (input && typeof input.url === "string") ? input.url
            : String(input);
        const request = {
            method: String(opts.method || "GET").toUpperCase(),
            url,
            headers: headerPairs(opts.headers),
            body: bodyText(opts.body),
        };
        const res = JSON.parse(await fetchOp(JSON.stringify(request)));
        return makeResponse(res, url);
    };
    class XMLHttpRequest {
        #method = "GET";
        #url = "";
        #async = true;
        #headers = [];
        #responseHeaders = [];
        constructor() {
            this.readyState = 0;
            this.status = 0;
            this.statusText = "";
            this.responseText = "";
            this.response = "";
            this.onload = null;
            this.onerror = null;
            this.onreadystatechange = null;
        }
        open(method, url, async) {
            this.#method = String(method || "GET").toUpperCase();
            this.#url = String(url);
            this.#async = async !== false;
            this.readyState = 1;
        }
        setRequestHeader(name, value) { this.#headers.push([String(name), String(value)]); }
        getResponseHeader(name) {
            const p = this.#responseHeaders.find(([k]) => k.toLowerCase() === String(name).toLowerCase());
            return p ? p[1] : null;
        }
        getAllResponseHeaders() {
            return this.#responseHeaders.map(([k, v]) => `${k}: ${v}\r\n`).join("");
        }
        send(body) {
            const request = {
                method: this.#method,
                url: this.#url,
                headers: this.#headers,
                body: bodyText(body),
            };
            const id = bridgeStartOp(JSON.stringify(request), "", false);
            const finish = (outcome) => {
                this.readyState = 4;
                if (outcome.state === "resolved") {
                    this.status = outcome.status;
                    this.responseText = outcome.body;
                    this.response = outcome.body;
                    this.#responseHeaders = outcome.headers;
                    if (this.onreadystatechange) this.onreadystatechange();
                    if (this.onload) this.onload();
                    return;
                }
                const error = new Error(outcome.state === "timed_out"
                    ? "request timed out" : outcome.message);
                if (this.onreadystatechange) this.onreadystatechange();
                if (this.onerror) { this.onerror(error); return; }
                if (!this.#async) throw error;
            };
            if (this.#async) {
                bridgeSettleOp(id).then((json) => finish(JSON.parse(json)));
            } else {
                finish(JSON.parse(bridgeResolveOp(id)));
            }
        }
    }
    globalThis.XMLHttpRequest = XMLHttpRequest;
    class RestClient {
        #tenant;
        constructor(options) {
            this.#tenant = options && typeof options.tenant === "string" ? options.tenant : "";
        }
        call(method, url, options) {
            const opts = options || {};
            const request = {
                method: String(method || "GET").toUpperCase(),
                url: String(url),
                headers: headerPairs(opts.headers),
                body: bodyText(opts.body),
            };
            return bridgeHandle(bridgeStartOp(JSON.stringify(request), this.#tenant, true));
        }
    }"#;

const NETWORK_DENIED_JS: &str = r#"
    globalThis.fetch = async () => { throw restricted("fetch"); };
    class XMLHttpRequest {
        open() {}
        setRequestHeader() {}
        send() { throw restricted("XMLHttpRequest"); }
    }
    globalThis.XMLHttpRequest = XMLHttpRequest;
    class RestClient {
        call() { throw restricted("RestClient.call"); }
    }"#;

const CLASS_LOADER_JS: &str = r#"
    const classLookupOp = ops.op_jscell_class_lookup;
    globalThis.Java = Object.freeze({
        type: (name) => {
            if (classLookupOp(String(name)) === "rest_client") return RestClient;
            return class UnknownClass {};
        },
    });"#;

const HARDEN_JS: &str = r#"
    delete globalThis.Deno;
    delete globalThis.eval;
    const AsyncFunction = (async function(){}).constructor;
    const GeneratorFunction = (function*(){}).constructor;
    const AsyncGeneratorFunction = (async function*(){}).constructor;
    for (const ctor of [Function, AsyncFunction, GeneratorFunction, AsyncGeneratorFunction]) {
        Object.defineProperty(ctor.prototype, "constructor", {
            value: undefined, configurable: false, writable: false,
        });
    }
    delete globalThis.Function;"#;
