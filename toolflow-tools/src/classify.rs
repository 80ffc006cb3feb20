//! Heuristic classification of free-form failure messages.

use toolflow_primitives::ErrorCategory;

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded", "etimedout"];
const NETWORK_MARKERS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "connection refused",
    "connection reset",
    "network",
    "dns",
    "host unreachable",
    "broken pipe",
];
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "eacces",
    "eperm",
    "forbidden",
    "unauthorized",
    "access denied",
];
const NOT_FOUND_MARKERS: &[&str] = &["not found", "enoent", "no such file", "does not exist"];
const SYSTEM_MARKERS: &[&str] = &[
    "out of memory",
    "enomem",
    "enospc",
    "emfile",
    "too many open files",
    "no space left",
    "resource exhausted",
];
const VALIDATION_MARKERS: &[&str] = &[
    "invalid",
    "validation",
    "malformed",
    "missing required",
    "expected",
];

/// Maps a failure message onto an [`ErrorCategory`].
///
/// Matching is case-insensitive and checked in a fixed priority order, so a
/// message such as "connection timed out" resolves to
/// [`ErrorCategory::Timeout`].
#[must_use]
pub fn classify_message(message: &str) -> ErrorCategory {
    let lowered = message.to_ascii_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if contains_any(TIMEOUT_MARKERS) {
        ErrorCategory::Timeout
    } else if contains_any(PERMISSION_MARKERS) {
        ErrorCategory::Permission
    } else if contains_any(NOT_FOUND_MARKERS) {
        ErrorCategory::NotFound
    } else if contains_any(SYSTEM_MARKERS) {
        ErrorCategory::System
    } else if contains_any(NETWORK_MARKERS) {
        ErrorCategory::Network
    } else if contains_any(VALIDATION_MARKERS) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_failures() {
        let cases = [
            ("request timed out after 30s", ErrorCategory::Timeout),
            ("Connection timed out", ErrorCategory::Timeout),
            ("ECONNREFUSED 127.0.0.1:8080", ErrorCategory::Network),
            ("EACCES: permission denied, open '/etc/shadow'", ErrorCategory::Permission),
            ("ENOENT: no such file or directory", ErrorCategory::NotFound),
            ("EMFILE: too many open files", ErrorCategory::System),
            ("invalid regex: unclosed group", ErrorCategory::Validation),
            ("something odd happened", ErrorCategory::Unknown),
        ];

        for (message, expected) in cases {
            assert_eq!(classify_message(message), expected, "{message}");
        }
    }
}
