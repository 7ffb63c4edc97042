//! Upload admission validation
//!
//! Rules applied before a write location is issued:
//! - Filename: 1-255 bytes, no path separators, no control characters, not `.`/`..`
//! - Content type: `type/subtype` with RFC 6838 token characters, optionally restricted
//!   to an allow-list

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DepotError, DepotResult};

/// Maximum filename length in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

static CONTENT_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9!#$&^_.+\-]{0,126}/[a-z0-9][a-z0-9!#$&^_.+\-]{0,126}$")
        .expect("content type pattern is valid")
});

/// Validate an original filename as supplied by the client.
pub fn validate_filename(filename: &str) -> DepotResult<()> {
    if filename.trim().is_empty() {
        return Err(DepotError::Validation("Filename cannot be empty".to_string()));
    }

    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(DepotError::Validation(format!(
            "Filename exceeds maximum length of {} bytes",
            MAX_FILENAME_LENGTH
        )));
    }

    if filename == "." || filename == ".." {
        return Err(DepotError::Validation(format!(
            "Filename '{}' is not allowed",
            filename
        )));
    }

    if filename.contains('/') || filename.contains('\\') {
        return Err(DepotError::Validation(
            "Filename must not contain path separators".to_string(),
        ));
    }

    if filename.chars().any(|c| c.is_control()) {
        return Err(DepotError::Validation(
            "Filename must not contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate and normalize a declared content type.
///
/// Parameters such as `; charset=utf-8` are dropped. When `allowed` is non-empty the
/// normalized type must be listed there.
pub fn normalize_content_type(content_type: &str, allowed: &[String]) -> DepotResult<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if !CONTENT_TYPE_PATTERN.is_match(&essence) {
        return Err(DepotError::Validation(format!(
            "Invalid content type: '{}'",
            content_type
        )));
    }

    if !allowed.is_empty() && !allowed.iter().any(|a| a == &essence) {
        return Err(DepotError::Validation(format!(
            "Content type '{}' is not allowed",
            essence
        )));
    }

    Ok(essence)
}

/// Reduce a filename to characters safe for a storage key segment.
///
/// Runs of `.` collapse to one, so the result never contains `..`.
pub fn sanitize_key_segment(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());
    for c in filename.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if c == '.' && sanitized.ends_with('.') {
            continue;
        }
        sanitized.push(c);
    }

    let trimmed = sanitized.trim_matches('.');
    if trimmed.is_empty() {
        "artifact".to_string()
    } else {
        trimmed.chars().take(128).collect()
    }
}
