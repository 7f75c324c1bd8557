//! Redaction for messages and code previews that leave the sandbox.
//!
//! Strips credentials, host file paths, URL userinfo and V8 stack frames while
//! keeping the parts a caller needs to fix their code: error names, messages,
//! function names, HTTP status codes.

use std::sync::LazyLock;

use regex::Regex;

static URL_USERINFO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<scheme>https?://)[^\s/@]+@").unwrap());

static HOST_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(home|Users|etc|var|tmp|opt|usr|root|srv|run|app)(/[\w.\-]+)+").unwrap()
});

/// Authorization header values and form or query credentials.
static CREDENTIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\bBearer)\s+[\w.~+/=\-]+|\bBasic\s+[A-Za-z0-9+/]{8,}={0,2}|\b(?:access_token|refresh_token|client_secret|api_key|password|token)=[^\s&]+",
    )
    .unwrap()
});

/// Token fields in OAuth JSON bodies echoed back by upstream errors.
static TOKEN_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?P<field>access_token|refresh_token|id_token|client_secret)"\s*:\s*"[^"]*""#)
        .unwrap()
});

static JWT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"eyJ[\w-]+\.eyJ[\w-]+\.[\w-]+").unwrap());

/// V8 frame lines: `at fn (loc:line:col)`, `at fn (<anonymous>)`, `at loc:line:col`.
static STACK_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*at\s+(?:[^\n(]*\((?:[^\n()]*:\d+:\d+|<anonymous>|native)\)|(?:async\s+)?[^\s()]+:\d+:\d+)\s*$",
    )
    .unwrap()
});

/// Make a failure message safe to return to the caller.
///
/// - bearer and basic credentials, OAuth token fields, JWTs → `[REDACTED]`
/// - URL userinfo → `scheme://[REDACTED]@`
/// - host file paths → `[path]`
/// - stack frame lines → removed
pub fn redact_message(message: &str) -> String {
    let mut msg = message.to_string();

    msg = TOKEN_FIELD_RE
        .replace_all(&msg, r#""${field}":"[REDACTED]""#)
        .to_string();
    msg = CREDENTIAL_RE.replace_all(&msg, "[REDACTED]").to_string();
    msg = JWT_RE.replace_all(&msg, "[REDACTED]").to_string();
    msg = URL_USERINFO_RE
        .replace_all(&msg, "${scheme}[REDACTED]@")
        .to_string();
    msg = HOST_PATH_RE.replace_all(&msg, "[path]").to_string();
    msg = STACK_FRAME_RE.replace_all(&msg, "").to_string();

    let lines: Vec<&str> = msg.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.join("\n")
}

/// Redacted, length-bounded preview of submitted code for audit records.
pub fn code_preview(code: &str, max_chars: usize) -> String {
    let redacted = redact_message(code);
    match redacted.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &redacted[..cut]),
        None => redacted,
    }
}
