//! Report sinks and disposable resources.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::report::ExecutionReport;

/// Receives every finished [`ExecutionReport`].
pub trait ReportSink: Send + Sync {
    /// Called once per batch after all calls are settled.
    fn record(&self, report: &ExecutionReport);
}

/// Logs a one-line summary per batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn record(&self, report: &ExecutionReport) {
        let meta = &report.metadata;
        info!(
            batch_id = %meta.batch_id,
            total = meta.total_calls,
            successful = meta.successful,
            failed = meta.failed,
            skipped = meta.skipped,
            cache_hits = meta.cache_hits,
            duration_ms = meta.duration_ms,
            "batch complete"
        );
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<ExecutionReport>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every report recorded so far.
    #[must_use]
    pub fn reports(&self) -> Vec<ExecutionReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReportSink for CollectingSink {
    fn record(&self, report: &ExecutionReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

/// Resource released when the orchestrator shuts down.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Name used in disposal error messages.
    fn name(&self) -> &str;

    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Returns an error when the resource could not be released cleanly.
    async fn dispose(&self) -> anyhow::Result<()>;
}
