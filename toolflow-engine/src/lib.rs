//! Orchestration core for tool-call batches.
//!
//! A batch of [`ToolCall`](toolflow_primitives::ToolCall)s is resolved into an
//! [`ExecutionPlan`] of dependency levels, then executed level by level on a
//! bounded [`WorkerPool`]. Each call passes through the result cache, a
//! per-tool [`CircuitBreaker`], the approval gate, and the [`RetryPolicy`]
//! before its outcome is recorded in an [`ExecutionReport`].

#![warn(missing_docs, clippy::pedantic)]

pub mod breaker;
pub mod graph;
pub mod options;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod sink;
pub mod substitution;

use thiserror::Error;
use toolflow_primitives::CallId;

pub use breaker::{
    BreakerCallError, BreakerConfig, BreakerOpen, BreakerRegistry, BreakerSnapshot, CircuitBreaker,
    CircuitState,
};
pub use graph::DependencyGraph;
pub use options::ExecuteOptions;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use pool::{PoolError, WorkerPermit, WorkerPool};
pub use report::{CallFailure, CallResult, ExecutionMetadata, ExecutionReport};
pub use resolver::{DependencyResolver, ExecutionPlan};
pub use retry::RetryPolicy;
pub use sink::{CollectingSink, Disposable, ReportSink, TracingReportSink};
pub use substitution::{SubstitutionError, substitute};

/// Errors that reject a batch before any call runs, or that surface from
/// engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The dependency graph contains a cycle.
    #[error("circular dependency: {}", format_cycle(.cycle))]
    CircularDependency {
        /// Calls forming the cycle; each depends on the next and the last on
        /// the first.
        cycle: Vec<CallId>,
    },
    /// A call names a tool the registry does not know.
    #[error("call `{call_id}` references unknown tool `{tool_name}`")]
    UnknownTool {
        /// Offending call.
        call_id: CallId,
        /// Tool name that failed to resolve.
        tool_name: String,
    },
    /// Two calls share an identifier.
    #[error("duplicate call id `{call_id}`")]
    DuplicateCallId {
        /// Repeated identifier.
        call_id: CallId,
    },
    /// A call depends on an identifier outside the batch.
    #[error("call `{call_id}` depends on `{dependency}`, which is not in the batch")]
    UnknownDependency {
        /// Offending call.
        call_id: CallId,
        /// Missing dependency.
        dependency: CallId,
    },
    /// Configuration could not be turned into a working engine.
    #[error(transparent)]
    Config(#[from] toolflow_config::ConfigError),
    /// One or more resources failed to shut down.
    #[error("disposal failed: {}", .errors.join("; "))]
    Disposal {
        /// Every failure, in the order resources were disposed.
        errors: Vec<String>,
    },
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

fn format_cycle(cycle: &[CallId]) -> String {
    let mut rendered: Vec<&str> = cycle.iter().map(CallId::as_str).collect();
    if let Some(first) = cycle.first() {
        rendered.push(first.as_str());
    }
    rendered.join(" -> ")
}
