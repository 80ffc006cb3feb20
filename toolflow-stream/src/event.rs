//! Event payloads carried by the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolflow_primitives::{BatchId, CallId};

/// Type-specific payload of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEventKind {
    /// A batch began executing.
    Started {
        /// Batch being executed.
        batch_id: BatchId,
        /// Number of calls in the batch.
        total_calls: usize,
    },
    /// Incremental content produced by a source.
    Content {
        /// Text appended since the previous chunk.
        delta: String,
    },
    /// A call was dispatched.
    ToolCallStarted {
        /// Call identifier.
        call_id: CallId,
        /// Tool being invoked.
        tool_name: String,
    },
    /// A call finished, successfully or not.
    ToolCallComplete {
        /// Call identifier.
        call_id: CallId,
        /// Tool that ran.
        tool_name: String,
        /// Whether the call succeeded.
        success: bool,
        /// Whether the result came from the cache.
        cache_hit: bool,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// A failure was observed.
    Error {
        /// Human-readable failure description.
        message: String,
        /// Whether the stream may continue after this error.
        recoverable: bool,
    },
    /// The stream finished.
    Done {
        /// Free-form summary, usually batch metadata.
        #[serde(default)]
        summary: Value,
    },
}

impl StreamEventKind {
    /// Returns the serialized `type` tag.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Content { .. } => "content",
            Self::ToolCallStarted { .. } => "tool-call-started",
            Self::ToolCallComplete { .. } => "tool-call-complete",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

/// Timestamped stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    kind: StreamEventKind,
}

impl StreamEvent {
    /// Stamps `kind` with the current time.
    #[must_use]
    pub fn now(kind: StreamEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Returns when the event was produced.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the payload.
    #[must_use]
    pub fn kind(&self) -> &StreamEventKind {
        &self.kind
    }

    /// Consumes the event, returning its payload.
    #[must_use]
    pub fn into_kind(self) -> StreamEventKind {
        self.kind
    }

    /// Returns true for the terminal `done` event.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.kind, StreamEventKind::Done { .. })
    }
}
