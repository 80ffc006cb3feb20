//! Approval gate shared by every call the orchestrator runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::{ApprovalDecision, ApprovalOutcome, DecisionKind};
use crate::observer::ApprovalObserver;
use crate::prompt::ApprovalPrompt;
use crate::request::ApprovalRequest;
use crate::rules::ApprovalPolicy;

/// Audit counters accumulated by the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    /// Auto-approved calls per tool name.
    pub auto_approved: BTreeMap<String, u64>,
    /// Always-denied calls per tool name.
    pub always_denied: BTreeMap<String, u64>,
    /// Calls for which the prompt was consulted.
    pub prompted: u64,
    /// Prompted calls the operator accepted.
    pub approved: u64,
    /// Calls refused at the prompt or lacking a prompt.
    pub denied: u64,
}

/// Decides whether each call may run.
///
/// Safe to share across concurrent calls and batches; the policy may be
/// replaced at runtime.
pub struct ApprovalGate {
    policy: RwLock<ApprovalPolicy>,
    stats: Mutex<ApprovalStats>,
    observer: Option<Arc<dyn ApprovalObserver>>,
}

impl fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("observer_configured", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(ApprovalPolicy::default())
    }
}

impl ApprovalGate {
    /// Creates a gate enforcing `policy`.
    #[must_use]
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            stats: Mutex::new(ApprovalStats::default()),
            observer: None,
        }
    }

    /// Configures an observer, returning the updated gate for chaining.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ApprovalObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replaces the active policy.
    pub fn set_policy(&self, policy: ApprovalPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Returns a copy of the active policy.
    #[must_use]
    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evaluates the policy and, when required, consults `prompt`.
    ///
    /// A call that needs a prompt but has none available is denied rather
    /// than silently executed.
    pub async fn check(
        &self,
        request: &ApprovalRequest,
        contract_requires: bool,
        prompt: Option<&dyn ApprovalPrompt>,
    ) -> ApprovalOutcome {
        let decision = self
            .policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .evaluate(request, contract_requires);

        let outcome = match decision.kind() {
            DecisionKind::Deny => ApprovalOutcome::AlwaysDenied,
            DecisionKind::Allow if decision.matched_rule().is_some() => ApprovalOutcome::AutoApproved,
            DecisionKind::Allow => ApprovalOutcome::NotRequired,
            DecisionKind::Escalate => match prompt {
                Some(prompt) => {
                    debug!(call_id = %request.call_id(), tool = request.tool_name(), "awaiting approval prompt");
                    if prompt.confirm(&request.description()).await {
                        ApprovalOutcome::Approved
                    } else {
                        ApprovalOutcome::Denied
                    }
                }
                None => {
                    debug!(call_id = %request.call_id(), tool = request.tool_name(), "no approval prompt configured");
                    ApprovalOutcome::Denied
                }
            },
        };

        self.record(request, &decision, outcome, prompt.is_some());
        if let Some(observer) = &self.observer {
            observer.on_outcome(request, &decision, outcome);
        }
        outcome
    }

    /// Returns a snapshot of the audit counters.
    #[must_use]
    pub fn stats(&self) -> ApprovalStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears the audit counters.
    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = ApprovalStats::default();
    }

    fn record(
        &self,
        request: &ApprovalRequest,
        decision: &ApprovalDecision,
        outcome: ApprovalOutcome,
        prompt_available: bool,
    ) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let tool = request.tool_name().to_owned();
        match outcome {
            ApprovalOutcome::NotRequired => {}
            ApprovalOutcome::AutoApproved => *stats.auto_approved.entry(tool).or_default() += 1,
            ApprovalOutcome::AlwaysDenied => *stats.always_denied.entry(tool).or_default() += 1,
            ApprovalOutcome::Approved => {
                stats.prompted += 1;
                stats.approved += 1;
            }
            ApprovalOutcome::Denied => {
                if prompt_available && decision.is_escalate() {
                    stats.prompted += 1;
                }
                stats.denied += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::StaticPrompt;
    use crate::rules::{ApprovalRule, RuleEffect, RuleMatcher};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolflow_primitives::CallId;

    fn request(tool: &str) -> ApprovalRequest {
        ApprovalRequest::new(CallId::new("c1").unwrap(), tool, json!({ "path": "a.txt" }))
    }

    struct CountingPrompt {
        answer: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ApprovalPrompt for CountingPrompt {
        async fn confirm(&self, description: &str) -> bool {
            assert!(description.contains("a.txt"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[tokio::test]
    async fn prompt_decides_when_contract_requires() {
        let gate = ApprovalGate::default();
        let prompt = CountingPrompt {
            answer: false,
            calls: AtomicUsize::new(0),
        };

        let outcome = gate.check(&request("write_file"), true, Some(&prompt)).await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        let outcome = gate.check(&request("read_file"), false, Some(&prompt)).await;
        assert_eq!(outcome, ApprovalOutcome::NotRequired);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        let outcome = gate
            .check(&request("write_file"), true, Some(&StaticPrompt(true)))
            .await;
        assert_eq!(outcome, ApprovalOutcome::Approved);

        let stats = gate.stats();
        assert_eq!(stats.prompted, 2);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.denied, 1);
    }

    #[tokio::test]
    async fn missing_prompt_denies() {
        let gate = ApprovalGate::default();
        assert_eq!(
            gate.check(&request("write_file"), true, None).await,
            ApprovalOutcome::Denied
        );
        let stats = gate.stats();
        assert_eq!(stats.prompted, 0);
        assert_eq!(stats.denied, 1);
    }

    #[tokio::test]
    async fn rules_skip_the_prompt_and_are_audited() {
        let gate = ApprovalGate::new(ApprovalPolicy::from_lists(
            &["write_file"],
            &[],
            &["rm"],
            &[],
        ));
        let prompt = CountingPrompt {
            answer: true,
            calls: AtomicUsize::new(0),
        };

        assert_eq!(
            gate.check(&request("write_file"), true, Some(&prompt)).await,
            ApprovalOutcome::AutoApproved
        );
        assert_eq!(
            gate.check(&request("rm"), true, Some(&prompt)).await,
            ApprovalOutcome::AlwaysDenied
        );
        assert_eq!(
            gate.check(&request("rm"), false, Some(&prompt)).await,
            ApprovalOutcome::AlwaysDenied
        );
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);

        let stats = gate.stats();
        assert_eq!(stats.auto_approved.get("write_file"), Some(&1));
        assert_eq!(stats.always_denied.get("rm"), Some(&2));

        gate.reset_stats();
        assert_eq!(gate.stats(), ApprovalStats::default());
    }

    #[tokio::test]
    async fn policy_can_be_replaced() {
        let gate = ApprovalGate::default();
        gate.set_policy(ApprovalPolicy::new().with_rule(
            ApprovalRule::new("deny-all", RuleMatcher::AnyTool, RuleEffect::AlwaysDeny).unwrap(),
        ));
        assert_eq!(gate.policy().rules().len(), 1);
        assert_eq!(
            gate.check(&request("anything"), false, None).await,
            ApprovalOutcome::AlwaysDenied
        );
    }
}
