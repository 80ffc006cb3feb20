//! Per-batch execution options.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use toolflow_approval::ApprovalPrompt;
use toolflow_stream::StreamProducer;
use tokio_util::sync::CancellationToken;

/// Overrides applied to a single [`Orchestrator::execute`](crate::Orchestrator::execute) call.
///
/// Unset fields fall back to the orchestrator defaults.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    max_concurrency: Option<NonZeroUsize>,
    use_cache: Option<bool>,
    fail_fast: Option<bool>,
    approval_prompt: Option<Arc<dyn ApprovalPrompt>>,
    cancellation: Option<CancellationToken>,
    timeout: Option<Duration>,
    events: Option<StreamProducer>,
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("use_cache", &self.use_cache)
            .field("fail_fast", &self.fail_fast)
            .field("approval_prompt", &self.approval_prompt.is_some())
            .field("cancellation", &self.cancellation.is_some())
            .field("timeout", &self.timeout)
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl ExecuteOptions {
    /// Creates options that defer to the orchestrator defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of calls in flight for this batch.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Enables or bypasses the result cache.
    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    /// Cancels the remaining calls after the first hard failure.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    /// Prompt consulted for calls that need operator approval.
    #[must_use]
    pub fn with_approval_prompt(mut self, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        self.approval_prompt = Some(prompt);
        self
    }

    /// Token the caller can use to cancel the batch.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Deadline for the whole batch.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Producer that receives progress events.
    #[must_use]
    pub fn with_events(mut self, producer: StreamProducer) -> Self {
        self.events = Some(producer);
        self
    }

    pub(crate) fn max_concurrency(&self) -> Option<NonZeroUsize> {
        self.max_concurrency
    }

    pub(crate) fn use_cache(&self) -> Option<bool> {
        self.use_cache
    }

    pub(crate) fn fail_fast(&self) -> Option<bool> {
        self.fail_fast
    }

    pub(crate) fn approval_prompt(&self) -> Option<Arc<dyn ApprovalPrompt>> {
        self.approval_prompt.clone()
    }

    pub(crate) fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn events(&self) -> Option<&StreamProducer> {
        self.events.as_ref()
    }
}
