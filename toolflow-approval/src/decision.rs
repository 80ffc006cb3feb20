//! Approval decisions produced by the policy and outcomes recorded per call.

use serde::{Deserialize, Serialize};

/// Describes the result of evaluating the approval policy for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Call may run without a prompt.
    Allow,
    /// Call is rejected outright.
    Deny,
    /// Call needs human confirmation before running.
    Escalate,
}

/// Structured decision emitted by an [`ApprovalPolicy`](crate::ApprovalPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    matched_rule: Option<String>,
}

impl ApprovalDecision {
    /// Returns an allow decision with no additional context.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            kind: DecisionKind::Allow,
            reason: None,
            matched_rule: None,
        }
    }

    /// Returns a deny decision with an explanatory reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Deny,
            reason: Some(reason.into()),
            matched_rule: None,
        }
    }

    /// Returns an escalate decision with an explanatory reason.
    #[must_use]
    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Escalate,
            reason: Some(reason.into()),
            matched_rule: None,
        }
    }

    /// Records the name of the rule that produced this decision.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }

    /// Returns the decision kind.
    #[must_use]
    pub fn kind(&self) -> DecisionKind {
        self.kind
    }

    /// Returns true when the call may proceed without a prompt.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.kind == DecisionKind::Allow
    }

    /// Returns true when the call is rejected.
    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.kind == DecisionKind::Deny
    }

    /// Returns true when a prompt is required.
    #[must_use]
    pub fn is_escalate(&self) -> bool {
        self.kind == DecisionKind::Escalate
    }

    /// Returns the optional reason associated with the decision.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the name of the rule that matched, if any.
    #[must_use]
    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }
}

/// Approval provenance attached to every executed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalOutcome {
    /// The tool does not require approval.
    #[default]
    NotRequired,
    /// An auto-approve rule waived the prompt.
    AutoApproved,
    /// The prompt was shown and the operator accepted.
    Approved,
    /// The prompt was shown and the operator refused, or no prompt was
    /// available.
    Denied,
    /// An always-deny rule rejected the call without prompting.
    AlwaysDenied,
}

impl ApprovalOutcome {
    /// Returns true when the call may run.
    #[must_use]
    pub fn is_permitted(self) -> bool {
        matches!(self, Self::NotRequired | Self::AutoApproved | Self::Approved)
    }

    /// Returns a stable label for logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRequired => "not-required",
            Self::AutoApproved => "auto-approved",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::AlwaysDenied => "always-denied",
        }
    }
}
