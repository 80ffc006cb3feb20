//! Rule-based approval policy.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use crate::decision::ApprovalDecision;
use crate::request::ApprovalRequest;

/// Errors surfaced while building approval rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    /// Rule configuration error.
    #[error("invalid approval rule: {0}")]
    InvalidRule(&'static str),
}

/// Selects the calls a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// Every tool.
    AnyTool,
    /// Tools with exactly this name.
    Tool(String),
    /// Tools whose contract declares this category.
    Category(String),
}

impl RuleMatcher {
    fn matches(&self, request: &ApprovalRequest) -> bool {
        match self {
            Self::AnyTool => true,
            Self::Tool(name) => request.tool_name() == name,
            Self::Category(category) => request.category() == Some(category.as_str()),
        }
    }
}

/// What happens to a call matched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    /// Waive the prompt for tools that would otherwise need one.
    AutoApprove,
    /// Reject the call without prompting.
    AlwaysDeny,
}

/// Named matcher plus effect.
#[derive(Debug, Clone)]
pub struct ApprovalRule {
    name: String,
    matcher: RuleMatcher,
    effect: RuleEffect,
}

impl ApprovalRule {
    /// Creates a new rule.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidRule`] when the rule name is empty or the
    /// matcher targets an empty tool name or category.
    pub fn new(
        name: impl Into<String>,
        matcher: RuleMatcher,
        effect: RuleEffect,
    ) -> Result<Self, ApprovalError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ApprovalError::InvalidRule("rule name cannot be empty"));
        }
        match &matcher {
            RuleMatcher::Tool(target) | RuleMatcher::Category(target)
                if target.trim().is_empty() =>
            {
                return Err(ApprovalError::InvalidRule("rule target cannot be empty"));
            }
            _ => {}
        }

        Ok(Self {
            name,
            matcher,
            effect,
        })
    }

    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the rule matcher.
    #[must_use]
    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    /// Returns the rule effect.
    #[must_use]
    pub fn effect(&self) -> RuleEffect {
        self.effect
    }

    fn matches(&self, request: &ApprovalRequest) -> bool {
        self.matcher.matches(request)
    }
}

/// Ordered collection of approval rules.
///
/// Always-deny rules are consulted before auto-approve rules regardless of
/// insertion order; within each group the first match wins.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    rules: Vec<ApprovalRule>,
}

impl ApprovalPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a policy from tool and category lists.
    ///
    /// Blank entries are ignored.
    #[must_use]
    pub fn from_lists<S: AsRef<str>>(
        auto_approve_tools: &[S],
        auto_approve_categories: &[S],
        always_deny_tools: &[S],
        always_deny_categories: &[S],
    ) -> Self {
        let mut policy = Self::new();
        let groups = [
            (always_deny_tools, RuleEffect::AlwaysDeny, false),
            (always_deny_categories, RuleEffect::AlwaysDeny, true),
            (auto_approve_tools, RuleEffect::AutoApprove, false),
            (auto_approve_categories, RuleEffect::AutoApprove, true),
        ];
        for (targets, effect, by_category) in groups {
            for target in targets {
                let target = target.as_ref().trim();
                let (name, matcher) = if by_category {
                    (
                        format!("{}:category:{target}", effect_label(effect)),
                        RuleMatcher::Category(target.to_owned()),
                    )
                } else {
                    (
                        format!("{}:tool:{target}", effect_label(effect)),
                        RuleMatcher::Tool(target.to_owned()),
                    )
                };
                if let Ok(rule) = ApprovalRule::new(name, matcher, effect) {
                    policy.push(rule);
                }
            }
        }
        policy
    }

    /// Appends a rule.
    pub fn push(&mut self, rule: ApprovalRule) {
        self.rules.push(rule);
    }

    /// Appends a rule, returning the policy for chaining.
    #[must_use]
    pub fn with_rule(mut self, rule: ApprovalRule) -> Self {
        self.push(rule);
        self
    }

    /// Returns the configured rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[ApprovalRule] {
        &self.rules
    }

    /// Evaluates the policy for `request`.
    ///
    /// `contract_requires` is the tool contract's own approval flag. An
    /// always-deny match yields [`DecisionKind::Deny`](crate::DecisionKind)
    /// even for tools that would not otherwise need approval.
    #[must_use]
    pub fn evaluate(&self, request: &ApprovalRequest, contract_requires: bool) -> ApprovalDecision {
        if let Some(rule) = self.first_match(request, RuleEffect::AlwaysDeny) {
            debug!(rule = rule.name(), tool = request.tool_name(), "always-deny rule matched");
            return ApprovalDecision::deny(format!(
                "tool `{}` is denied by rule `{}`",
                request.tool_name(),
                rule.name()
            ))
            .with_rule(rule.name());
        }

        if !contract_requires {
            return ApprovalDecision::allow();
        }

        if let Some(rule) = self.first_match(request, RuleEffect::AutoApprove) {
            debug!(rule = rule.name(), tool = request.tool_name(), "auto-approve rule matched");
            return ApprovalDecision::allow().with_rule(rule.name());
        }

        ApprovalDecision::escalate(format!("tool `{}` requires approval", request.tool_name()))
    }

    /// Returns the distinct tool names named by rules with `effect`.
    #[must_use]
    pub fn tools_with_effect(&self, effect: RuleEffect) -> BTreeSet<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.effect == effect)
            .filter_map(|rule| match &rule.matcher {
                RuleMatcher::Tool(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn first_match(&self, request: &ApprovalRequest, effect: RuleEffect) -> Option<&ApprovalRule> {
        self.rules
            .iter()
            .find(|rule| rule.effect == effect && rule.matches(request))
    }
}

fn effect_label(effect: RuleEffect) -> &'static str {
    match effect {
        RuleEffect::AutoApprove => "auto-approve",
        RuleEffect::AlwaysDeny => "always-deny",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use toolflow_primitives::CallId;

    fn request(tool: &str, category: Option<&str>) -> ApprovalRequest {
        let request = ApprovalRequest::new(CallId::new("c1").unwrap(), tool, Value::Null);
        match category {
            Some(category) => request.with_category(category),
            None => request,
        }
    }

    #[test]
    fn contract_flag_drives_escalation() {
        let policy = ApprovalPolicy::new();
        assert!(policy.evaluate(&request("write_file", None), true).is_escalate());
        assert!(policy.evaluate(&request("read_file", None), false).is_allow());
    }

    #[test]
    fn auto_approve_matches_by_tool_or_category() {
        let policy = ApprovalPolicy::from_lists(&["write_file"], &["analysis"], &[], &[]);

        let decision = policy.evaluate(&request("write_file", None), true);
        assert!(decision.is_allow());
        assert_eq!(decision.matched_rule(), Some("auto-approve:tool:write_file"));

        assert!(policy.evaluate(&request("lint", Some("analysis")), true).is_allow());
        assert!(policy.evaluate(&request("delete", Some("mutation")), true).is_escalate());
    }

    #[test]
    fn always_deny_takes_precedence() {
        let policy = ApprovalPolicy::new()
            .with_rule(
                ApprovalRule::new("trust-shell", RuleMatcher::Tool("shell".into()), RuleEffect::AutoApprove)
                    .unwrap(),
            )
            .with_rule(
                ApprovalRule::new(
                    "no-external",
                    RuleMatcher::Category("external".into()),
                    RuleEffect::AlwaysDeny,
                )
                .unwrap(),
            );

        let decision = policy.evaluate(&request("shell", Some("external")), true);
        assert!(decision.is_deny());
        assert_eq!(decision.matched_rule(), Some("no-external"));

        // Denial applies even when the contract does not ask for approval.
        assert!(policy.evaluate(&request("fetch", Some("external")), false).is_deny());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert_eq!(
            ApprovalRule::new(" ", RuleMatcher::AnyTool, RuleEffect::AlwaysDeny).unwrap_err(),
            ApprovalError::InvalidRule("rule name cannot be empty")
        );
        assert!(ApprovalRule::new("x", RuleMatcher::Tool(String::new()), RuleEffect::AutoApprove).is_err());

        let policy = ApprovalPolicy::from_lists(&["", "echo"], &[], &["rm"], &[]);
        assert_eq!(policy.rules().len(), 2);
        assert_eq!(
            policy.tools_with_effect(RuleEffect::AlwaysDeny).into_iter().collect::<Vec<_>>(),
            ["rm"]
        );
    }
}
