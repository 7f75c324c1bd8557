//! Request validation, run before any isolate is constructed.
//!
//! Failures here are cheap and classified as `Validation`, so callers can tell
//! a malformed request apart from code that ran and failed.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SandboxError;
use crate::request::ExecutionRequest;

/// Maximum code size in bytes (5 MB), sized for pre-bundled payloads.
pub const DEFAULT_MAX_CODE_SIZE: usize = 5 * 1024 * 1024;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// ECMAScript reserved words, including strict-mode and literal names.
/// None of these can name a function, and splicing one into the harness
/// would be a syntax error rather than a lookup.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Whether `name` is a plain JavaScript identifier that can be spliced into a harness.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name) && !RESERVED_WORDS.contains(&name)
}

/// Validates an execution request before it reaches the engine.
pub fn validate_request(
    request: &ExecutionRequest,
    max_size: Option<usize>,
) -> Result<(), SandboxError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_CODE_SIZE);

    // 1. Function name must be a bare identifier
    if !is_identifier(&request.function_name) {
        return Err(SandboxError::ValidationFailed {
            reason: format!(
                "functionName '{}' is not a valid identifier",
                request.function_name.escape_default()
            ),
        });
    }

    // 2. Empty code
    if request.code.trim().is_empty() {
        return Err(SandboxError::ValidationFailed {
            reason: "code is empty".into(),
        });
    }

    // 3. Size limit
    if request.code.len() > max {
        return Err(SandboxError::CodeTooLarge {
            max,
            actual: request.code.len(),
        });
    }

    // 4. Arguments must serialize to a bounded literal
    let args_len = serde_json::to_string(&request.arguments)
        .map_err(|e| SandboxError::ValidationFailed {
            reason: format!("arguments are not JSON-serializable: {e}"),
        })?
        .len();
    if args_len > max {
        return Err(SandboxError::ValidationFailed {
            reason: format!("arguments exceed maximum size of {max} bytes (got {args_len})"),
        });
    }

    Ok(())
}
