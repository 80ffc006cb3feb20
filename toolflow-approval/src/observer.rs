//! Hooks notified whenever the gate settles a call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::decision::{ApprovalDecision, ApprovalOutcome};
use crate::request::ApprovalRequest;

/// Observer invoked after every approval check.
pub trait ApprovalObserver: Send + Sync {
    /// Records the policy decision and final outcome for `request`.
    fn on_outcome(
        &self,
        request: &ApprovalRequest,
        decision: &ApprovalDecision,
        outcome: ApprovalOutcome,
    );
}

/// Observer that emits outcomes to the tracing system.
#[derive(Debug, Default)]
pub struct TracingApprovalObserver;

impl ApprovalObserver for TracingApprovalObserver {
    fn on_outcome(
        &self,
        request: &ApprovalRequest,
        decision: &ApprovalDecision,
        outcome: ApprovalOutcome,
    ) {
        let rule = decision.matched_rule().unwrap_or_default();
        match outcome {
            ApprovalOutcome::NotRequired => {
                debug!(call_id = %request.call_id(), tool = request.tool_name(), "approval not required");
            }
            ApprovalOutcome::AutoApproved | ApprovalOutcome::Approved => {
                info!(
                    call_id = %request.call_id(),
                    tool = request.tool_name(),
                    outcome = outcome.as_str(),
                    rule,
                    "call approved"
                );
            }
            ApprovalOutcome::Denied | ApprovalOutcome::AlwaysDenied => {
                warn!(
                    call_id = %request.call_id(),
                    tool = request.tool_name(),
                    outcome = outcome.as_str(),
                    rule,
                    reason = decision.reason().unwrap_or_default(),
                    "call denied"
                );
            }
        }
    }
}

/// Observer fan-out that forwards to several observers in order.
#[derive(Default)]
pub struct CompositeApprovalObserver {
    observers: Vec<Arc<dyn ApprovalObserver>>,
}

impl CompositeApprovalObserver {
    /// Creates a composite observer from the supplied list.
    #[must_use]
    pub fn new<I>(observers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ApprovalObserver>>,
    {
        Self {
            observers: observers.into_iter().collect(),
        }
    }

    /// Adds an observer to the composite set.
    pub fn push(&mut self, observer: Arc<dyn ApprovalObserver>) {
        self.observers.push(observer);
    }
}

impl ApprovalObserver for CompositeApprovalObserver {
    fn on_outcome(
        &self,
        request: &ApprovalRequest,
        decision: &ApprovalDecision,
        outcome: ApprovalOutcome,
    ) {
        for observer in &self.observers {
            observer.on_outcome(request, decision, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Mutex;
    use toolflow_primitives::CallId;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ApprovalOutcome>>);

    impl ApprovalObserver for Recording {
        fn on_outcome(&self, _: &ApprovalRequest, _: &ApprovalDecision, outcome: ApprovalOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    #[test]
    fn composite_forwards_to_every_observer() {
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        let mut composite = CompositeApprovalObserver::new([
            first.clone() as Arc<dyn ApprovalObserver>,
            Arc::new(TracingApprovalObserver),
        ]);
        composite.push(second.clone());

        let request = ApprovalRequest::new(CallId::new("a").unwrap(), "echo", Value::Null);
        composite.on_outcome(&request, &ApprovalDecision::deny("no"), ApprovalOutcome::AlwaysDenied);

        assert_eq!(*first.0.lock().unwrap(), [ApprovalOutcome::AlwaysDenied]);
        assert_eq!(*second.0.lock().unwrap(), [ApprovalOutcome::AlwaysDenied]);
    }
}
