//! Per-call results and batch reports.

use serde::Serialize;
use serde_json::Value;
use toolflow_approval::ApprovalOutcome;
use toolflow_primitives::{BatchId, CallId, ErrorCategory};
use toolflow_tools::ToolError;

/// Categorized failure attached to a [`CallResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFailure {
    /// Failure category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying later or with different input could succeed.
    pub recoverable: bool,
    /// Remediation hint, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CallFailure {
    /// Creates a failure whose recoverability and hint follow from `category`.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            recoverable: category.is_recoverable(),
            suggestion: category.suggestion().map(str::to_owned),
        }
    }

    /// Converts a tool error.
    #[must_use]
    pub fn from_tool_error(error: &ToolError) -> Self {
        Self::new(error.category(), error.message())
    }
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    /// Call identifier.
    pub id: CallId,
    /// Tool that served (or would have served) the call.
    pub tool_name: String,
    /// Whether the call produced output.
    pub success: bool,
    /// Tool output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure details otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallFailure>,
    /// Wall time spent on the call, in milliseconds.
    pub duration_ms: u64,
    /// Whether the output came from the cache.
    pub cache_hit: bool,
    /// Approval outcome for the call.
    pub approval: ApprovalOutcome,
    /// Tool invocations made, including retries.
    pub attempts: u32,
}

impl CallResult {
    pub(crate) fn succeeded(id: CallId, tool_name: String, data: Value) -> Self {
        Self {
            id,
            tool_name,
            success: true,
            data: Some(data),
            error: None,
            duration_ms: 0,
            cache_hit: false,
            approval: ApprovalOutcome::NotRequired,
            attempts: 0,
        }
    }

    pub(crate) fn failed(id: CallId, tool_name: String, failure: CallFailure) -> Self {
        Self {
            id,
            tool_name,
            success: false,
            data: None,
            error: Some(failure),
            duration_ms: 0,
            cache_hit: false,
            approval: ApprovalOutcome::NotRequired,
            attempts: 0,
        }
    }

    /// Returns the failure category, if the call failed.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(|failure| failure.category)
    }

    /// Returns `true` when the call never ran its tool: an upstream call
    /// failed, the batch was cancelled first, or approval was refused.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        !self.success
            && (matches!(
                self.category(),
                Some(ErrorCategory::DependencyFailed | ErrorCategory::Cancelled)
            ) || matches!(
                self.approval,
                ApprovalOutcome::Denied | ApprovalOutcome::AlwaysDenied
            ))
    }

    /// Returns `true` when the tool ran (or would have) and failed.
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        !self.success && !self.is_skipped()
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Number of calls submitted.
    pub total_calls: usize,
    /// Calls that produced output.
    pub successful: usize,
    /// Calls whose tool ran and failed.
    pub failed: usize,
    /// Calls that never ran their tool.
    pub skipped: usize,
    /// Wall time of the batch, in milliseconds.
    pub duration_ms: u64,
    /// Successful calls served from the cache.
    pub cache_hits: usize,
    /// Levels in which at least one call was dispatched.
    pub levels_executed: usize,
    /// Highest number of calls observed in flight at once.
    pub max_parallelism: usize,
}

/// Full outcome of a batch, with results in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// One result per submitted call.
    pub results: Vec<CallResult>,
    /// Aggregate counters.
    pub metadata: ExecutionMetadata,
}

impl ExecutionReport {
    /// Looks up the result for `id`.
    #[must_use]
    pub fn result(&self, id: &str) -> Option<&CallResult> {
        self.results.iter().find(|result| result.id.as_str() == id)
    }

    /// Returns `true` when every call succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }
}
