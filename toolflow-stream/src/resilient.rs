//! Error recovery around an event source.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use toolflow_config::schema::StreamSettings;
use tracing::{debug, info, warn};

use crate::channel::StreamProducer;
use crate::event::{StreamEvent, StreamEventKind};
use crate::{StreamError, StreamResult};

/// What to try after an event source fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    /// Run the source again from the beginning.
    RetryFromScratch,
    /// Emit a degraded response instead of running the source again.
    Fallback(String),
}

/// Handle a source emits through; every event is forwarded to the consumer
/// and retained across attempts.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    producer: StreamProducer,
    recorded: Arc<Mutex<Vec<StreamEvent>>>,
    attempt: usize,
}

impl EventRecorder {
    /// Emits `kind` to the consumer and records it.
    ///
    /// # Errors
    ///
    /// Propagates [`StreamProducer::emit`] failures.
    pub async fn emit(&self, kind: StreamEventKind) -> StreamResult<()> {
        let event = StreamEvent::now(kind);
        self.producer.send(event.clone()).await?;
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    /// Returns the zero-based attempt this recorder belongs to.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns every event recorded so far, across all attempts.
    #[must_use]
    pub fn partial(&self) -> Vec<StreamEvent> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Result of a successful [`ResilientRunner::run`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Source runs performed.
    pub attempts: usize,
    /// The strategy that recovered the stream, if any was needed.
    pub recovered_by: Option<RecoveryStrategy>,
    /// Every event emitted, in order.
    pub events: Vec<StreamEvent>,
}

/// Runs an event source with bounded recovery.
///
/// Cancellation and a closed consumer are never retried.
#[derive(Debug, Clone)]
pub struct ResilientRunner {
    strategies: Vec<RecoveryStrategy>,
    max_recovery_attempts: usize,
}

impl Default for ResilientRunner {
    fn default() -> Self {
        Self::new(vec![RecoveryStrategy::RetryFromScratch], 2)
    }
}

impl ResilientRunner {
    /// Creates a runner that cycles through `strategies`, trying at most
    /// `max_recovery_attempts` of them.
    #[must_use]
    pub fn new(strategies: Vec<RecoveryStrategy>, max_recovery_attempts: usize) -> Self {
        Self {
            strategies,
            max_recovery_attempts,
        }
    }

    /// Creates a runner that retries from scratch up to the configured
    /// `stream.max_recovery_attempts` times.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(
            vec![RecoveryStrategy::RetryFromScratch],
            settings.max_recovery_attempts,
        )
    }

    /// Runs `source`, recovering from failures.
    ///
    /// Each failure is reported to the consumer as a recoverable `error`
    /// event before the next strategy is tried.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Cancelled`] or [`StreamError::Closed`] as soon as
    /// either occurs, and [`StreamError::Unrecovered`] with the retained
    /// partial events once every strategy has failed.
    pub async fn run<F, Fut>(&self, producer: &StreamProducer, mut source: F) -> StreamResult<RunOutcome>
    where
        F: FnMut(EventRecorder) -> Fut,
        Fut: Future<Output = StreamResult<()>>,
    {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let recorder = |attempt| EventRecorder {
            producer: producer.clone(),
            recorded: Arc::clone(&recorded),
            attempt,
        };
        let outcome = |attempts, recovered_by| RunOutcome {
            attempts,
            recovered_by,
            events: recorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        let mut attempts = 1;
        let mut last = match source(recorder(0)).await {
            Ok(()) => return Ok(outcome(attempts, None)),
            Err(error) => error,
        };

        let strategies = self.strategies.iter().cycle().take(self.max_recovery_attempts);
        for strategy in strategies {
            if is_terminal(&last) {
                return Err(last);
            }
            warn!(error = %last, strategy = ?strategy, "stream source failed; recovering");
            let current = recorder(attempts);
            current
                .emit(StreamEventKind::Error {
                    message: last.to_string(),
                    recoverable: true,
                })
                .await?;

            match strategy {
                RecoveryStrategy::RetryFromScratch => {
                    attempts += 1;
                    match source(current).await {
                        Ok(()) => {
                            info!(attempts, "stream recovered by retry");
                            return Ok(outcome(attempts, Some(strategy.clone())));
                        }
                        Err(error) => last = error,
                    }
                }
                RecoveryStrategy::Fallback(text) => {
                    current
                        .emit(StreamEventKind::Content { delta: text.clone() })
                        .await?;
                    info!(attempts, "stream recovered with fallback content");
                    return Ok(outcome(attempts, Some(strategy.clone())));
                }
            }
        }

        if is_terminal(&last) {
            return Err(last);
        }
        let reason = last.to_string();
        if let Err(error) = recorder(attempts)
            .emit(StreamEventKind::Error {
                message: reason.clone(),
                recoverable: false,
            })
            .await
        {
            debug!(error = %error, "could not report the unrecovered failure to the consumer");
        }
        Err(StreamError::Unrecovered {
            attempts,
            reason,
            partial: outcome(attempts, None).events,
        })
    }
}

fn is_terminal(error: &StreamError) -> bool {
    matches!(error, StreamError::Cancelled | StreamError::Closed)
}
