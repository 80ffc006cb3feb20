//! Live progress events for orchestrated batches.
//!
//! A [`StreamProducer`] emits [`StreamEvent`]s to a [`StreamConsumer`]. The
//! shared [`BackpressureController`] pauses the producer once the number of
//! unconsumed events reaches the high-water mark and resumes it when the
//! consumer drains below half of it. [`ResilientRunner`] wraps an event source
//! with bounded recovery strategies while retaining partial output.

#![warn(missing_docs, clippy::pedantic)]

pub mod backpressure;
pub mod channel;
pub mod consumer;
pub mod event;
pub mod resilient;

use thiserror::Error;

pub use backpressure::{BackpressureController, BackpressureState};
pub use channel::{StreamConsumer, StreamProducer, event_channel, event_channel_from_settings};
pub use consumer::{DeliveryStats, EventHandler, deliver};
pub use event::{StreamEvent, StreamEventKind};
pub use resilient::{EventRecorder, RecoveryStrategy, ResilientRunner, RunOutcome};

/// Errors surfaced by the streaming layer.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream was cancelled by the consumer or the caller.
    #[error("stream cancelled")]
    Cancelled,
    /// The other side of the channel has gone away.
    #[error("stream closed")]
    Closed,
    /// An event source failed.
    #[error("stream source failed: {reason}")]
    Source {
        /// Human-readable failure description.
        reason: String,
    },
    /// An event handler rejected an event.
    #[error("event handler failed: {reason}")]
    Handler {
        /// Human-readable failure description.
        reason: String,
    },
    /// Every recovery strategy was exhausted.
    #[error("stream failed after {attempts} attempts: {reason}")]
    Unrecovered {
        /// Number of source runs attempted.
        attempts: usize,
        /// The last failure observed.
        reason: String,
        /// Events emitted before giving up.
        partial: Vec<StreamEvent>,
    },
}

impl StreamError {
    /// Convenience constructor for source failures.
    #[must_use]
    pub fn source(reason: impl Into<String>) -> Self {
        Self::Source {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for handler failures.
    #[must_use]
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler {
            reason: reason.into(),
        }
    }
}

/// Result alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
