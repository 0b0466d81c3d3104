//! Helpers for keeping log lines, span fields and written files safe.

use std::path::Path;

/// Longest error body carried into an [`ApiError::Status`](crate::error::ApiError).
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo from a URL.
///
/// - `http://user:pw@host:8080/api` → `http://****@host:8080/api`
/// - `http://host:8080` → unchanged
pub fn redact_url(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &url[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }
    url.to_string()
}

/// Truncates a response body for error messages, on a char boundary.
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Reduces a server-provided filename to a single safe path component.
///
/// Directory parts are discarded and control characters and reserved
/// characters replaced with `_`. Returns `None` if nothing usable is left.
pub fn safe_filename(name: &str) -> Option<String> {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(name)
        .trim();

    let cleaned: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim().to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
