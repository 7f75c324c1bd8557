//! Legacy compatibility pass: auto-await for generated REST client code.
//!
//! Older code generators emit synchronous-looking calls against the
//! class-loader REST client:
//!
//! ```js
//! var RestClient = Java.type("org.jscell.http.RestClient");
//! var restClient = new RestClient();
//! var body = restClient.call("GET", url);
//! ```
//!
//! When all three literals are present, bare `restClient.call(` expressions
//! are rewritten to `await restClient.call(` and the target function is
//! promoted to `async` so the await is legal.
//!
//! Known limitations: the match is on the literal instance name `restClient`
//! and the literal class string. Renamed variables, aliases, and calls made
//! from helper functions other than the target are left alone (a helper that
//! does get a rewritten call is not promoted and will fail to parse).

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Fully-qualified class name the legacy generator loads.
pub const REST_CLIENT_CLASS: &str = "org.jscell.http.RestClient";

/// Constructor expression the legacy generator emits.
const REST_CLIENT_CONSTRUCTION: &str = "new RestClient(";

/// Instance variable name the legacy generator uses.
const REST_CLIENT_INSTANCE_CALL: &str = "restClient.call(";

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pre>^|[^\w$.])(?P<await>await\s+)?restClient\.call\(").unwrap()
});

/// Whether `code` carries the full class-loader / construction / call pattern.
pub fn matches_rest_call_pattern(code: &str) -> bool {
    let loads_class = code.contains(&format!("Java.type(\"{REST_CLIENT_CLASS}\")"))
        || code.contains(&format!("Java.type('{REST_CLIENT_CLASS}')"));
    loads_class
        && code.contains(REST_CLIENT_CONSTRUCTION)
        && code.contains(REST_CLIENT_INSTANCE_CALL)
}

/// Apply the auto-await rewrite if the pattern is present.
///
/// Returns the input unchanged (borrowed) when the pattern does not match.
pub fn apply_rest_call_await<'a>(code: &'a str, function_name: &str) -> Cow<'a, str> {
    if !matches_rest_call_pattern(code) {
        return Cow::Borrowed(code);
    }

    let awaited = CALL_RE.replace_all(code, |caps: &Captures| {
        let pre = &caps["pre"];
        match caps.name("await") {
            Some(existing) => format!("{pre}{}restClient.call(", existing.as_str()),
            None => format!("{pre}await restClient.call("),
        }
    });

    let declaration = Regex::new(&format!(
        r"(?P<async>async\s+)?\bfunction\s+{}\s*\(",
        regex::escape(function_name)
    ));
    let promoted = match declaration {
        Ok(re) => re
            .replace_all(&awaited, |caps: &Captures| {
                if caps.name("async").is_some() {
                    caps[0].to_string()
                } else {
                    format!("async {}", &caps[0])
                }
            })
            .into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "legacy pass: could not build declaration matcher");
            awaited.into_owned()
        }
    };

    tracing::debug!(function = %function_name, "legacy pass: rewrote restClient.call to awaited calls");
    Cow::Owned(promoted)
}
