//! Harness builder: turns normalized code plus an invocation into the exact
//! script run inside the isolate.
//!
//! The shape is chosen statically from the request, then filled into one of
//! three fixed templates. Every template hands the invocation promise to the
//! frozen reporter installed by the capability bootstrap (`__jscell.settle`),
//! which records the outcome in host state.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::SandboxError;
use crate::validator::is_identifier;

/// Default size above which import/export-free code is treated as pre-bundled.
pub const DEFAULT_BUNDLED_CODE_THRESHOLD: usize = 16 * 1024;

static MODULE_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:import|export)\b").unwrap());

/// Which template the harness was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessShape {
    /// Code and invocation inside one rethrow-preserving try/catch.
    Wrapped,
    /// Large pre-bundled code emitted unwrapped, then the guarded invocation.
    Bundled,
    /// Small or non-bundled transform payload, same layout as `Bundled`.
    PassThrough,
}

impl HarnessShape {
    /// Classify a request.
    pub fn classify(code: &str, skip_default_wrapper: bool, bundled_threshold: usize) -> Self {
        if !skip_default_wrapper {
            Self::Wrapped
        } else if looks_bundled(code, bundled_threshold) {
            Self::Bundled
        } else {
            Self::PassThrough
        }
    }

    /// Stable label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrapped => "wrapped",
            Self::Bundled => "bundled",
            Self::PassThrough => "pass_through",
        }
    }
}

/// Bundled sources carry no import/export keywords and tend to be large.
pub fn looks_bundled(code: &str, threshold: usize) -> bool {
    code.len() > threshold && !MODULE_KEYWORD_RE.is_match(code)
}

/// A fully rendered harness script.
#[derive(Debug, Clone)]
pub struct Harness {
    /// Template used.
    pub shape: HarnessShape,
    /// Script source passed to the engine.
    pub script: String,
}

impl Harness {
    /// Render the harness for one invocation.
    pub fn build(
        code: &str,
        function_name: &str,
        arguments: &[Value],
        skip_default_wrapper: bool,
        bundled_threshold: usize,
    ) -> Result<Self, SandboxError> {
        if !is_identifier(function_name) {
            return Err(SandboxError::ValidationFailed {
                reason: format!("functionName '{function_name}' is not a valid identifier"),
            });
        }
        let args = serde_json::to_string(arguments)?;
        let shape = HarnessShape::classify(code, skip_default_wrapper, bundled_threshold);
        let guard = existence_guard(function_name);

        let script = match shape {
            HarnessShape::Wrapped => format!(
                r#"__jscell.settle((async () => {{
try {{
{code}
;
{guard}
return await {function_name}(...{args});
}} catch (__jscellError) {{
throw __jscellError;
}}
}})());
"#
            ),
            HarnessShape::Bundled | HarnessShape::PassThrough => format!(
                r#"{code}
;
__jscell.settle((async () => {{
{guard}
return await {function_name}(...{args});
}})());
"#
            ),
        };

        Ok(Self { shape, script })
    }
}

fn existence_guard(function_name: &str) -> String {
    format!(
        r#"if (typeof {function_name} !== "function") {{
throw new Error("FunctionNotFound: '{function_name}' is not defined or is not a function");
}}"#
    )
}
