//! Failure taxonomy shared across the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category describing why a call or a batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Parameters were malformed or failed validation.
    Validation,
    /// Access to a resource was denied, including declined approvals.
    Permission,
    /// A referenced resource does not exist.
    NotFound,
    /// The operation exceeded its time budget.
    Timeout,
    /// A transport-level failure occurred.
    Network,
    /// The host ran out of a resource (memory, descriptors, disk).
    System,
    /// The call graph contained a cycle.
    CircularDependency,
    /// The circuit breaker guarding the tool is open.
    BreakerOpen,
    /// An upstream dependency failed, so this call was skipped.
    DependencyFailed,
    /// The batch was cancelled before the call could finish.
    Cancelled,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorCategory {
    /// Returns the stable kebab-case label for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::NotFound => "not-found",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::System => "system",
            Self::CircularDependency => "circular-dependency",
            Self::BreakerOpen => "breaker-open",
            Self::DependencyFailed => "dependency-failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` for categories worth retrying automatically.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }

    /// Returns `true` when the caller could reasonably succeed by trying again
    /// later or after adjusting the request.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        !matches!(self, Self::CircularDependency | Self::Permission)
    }

    /// Returns a remediation hint suitable for surfacing to a user.
    #[must_use]
    pub const fn suggestion(self) -> Option<&'static str> {
        match self {
            Self::Validation => Some("check the call parameters against the tool's schema"),
            Self::Permission => Some("verify access rights or approve the call"),
            Self::NotFound => Some("confirm the referenced resource exists"),
            Self::Timeout => Some("retry later or raise the tool timeout"),
            Self::Network => Some("check connectivity and retry"),
            Self::System => Some("free system resources and retry"),
            Self::CircularDependency => Some("remove the dependency cycle from the batch"),
            Self::BreakerOpen => Some("wait for the breaker reset timeout before retrying"),
            Self::DependencyFailed => Some("fix the failing upstream call first"),
            Self::Cancelled | Self::Unknown => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeout_and_network_are_transient() {
        let transient: Vec<_> = [
            ErrorCategory::Validation,
            ErrorCategory::Permission,
            ErrorCategory::NotFound,
            ErrorCategory::Timeout,
            ErrorCategory::Network,
            ErrorCategory::System,
            ErrorCategory::BreakerOpen,
            ErrorCategory::Unknown,
        ]
        .into_iter()
        .filter(|c| c.is_transient())
        .collect();

        assert_eq!(transient, [ErrorCategory::Timeout, ErrorCategory::Network]);
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&ErrorCategory::DependencyFailed).unwrap();
        assert_eq!(json, "\"dependency-failed\"");
        assert_eq!(ErrorCategory::BreakerOpen.to_string(), "breaker-open");
    }
}
