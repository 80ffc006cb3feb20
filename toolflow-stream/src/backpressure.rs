//! Flow control between a fast producer and a slower consumer.

use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{StreamError, StreamResult};

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackpressureState {
    /// Events produced but not yet consumed.
    pub buffered: usize,
    /// Buffered count at which the producer pauses.
    pub high_water_mark: usize,
    /// Whether the producer is currently paused.
    pub paused: bool,
    /// How many times the producer has been paused.
    pub pause_count: u64,
    /// Total events admitted.
    pub produced: u64,
    /// Total events consumed.
    pub consumed: u64,
}

#[derive(Debug)]
struct Counters {
    buffered: usize,
    paused: bool,
    pause_count: u64,
    produced: u64,
    consumed: u64,
}

/// Tracks buffered-but-unconsumed items and parks the producer while the
/// buffer is full.
///
/// The producer pauses once the buffered count reaches the high-water mark
/// and resumes only after consumption brings it below half of that mark.
/// Paused producers wait on a [`Notify`] rather than polling.
#[derive(Debug)]
pub struct BackpressureController {
    high_water_mark: usize,
    counters: Mutex<Counters>,
    resumed: Notify,
}

impl BackpressureController {
    /// Creates a controller pausing at `high_water_mark` buffered items.
    #[must_use]
    pub fn new(high_water_mark: NonZeroUsize) -> Self {
        Self {
            high_water_mark: high_water_mark.get(),
            counters: Mutex::new(Counters {
                buffered: 0,
                paused: false,
                pause_count: 0,
                produced: 0,
                consumed: 0,
            }),
            resumed: Notify::new(),
        }
    }

    /// Waits until production is allowed, then accounts for one new item.
    pub async fn acquire(&self) {
        loop {
            let mut notified = pin!(self.resumed.notified());
            // Register before checking so a resume between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if self.try_admit() {
                return;
            }
            trace!(high_water_mark = self.high_water_mark, "producer paused");
            notified.await;
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Cancelled`] if the token is cancelled first.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> StreamResult<()> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StreamError::Cancelled),
            () = self.acquire() => Ok(()),
        }
    }

    /// Accounts for one consumed item, resuming the producer when the buffer
    /// has drained below half the high-water mark.
    pub fn release(&self) {
        let resume = {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            counters.buffered = counters.buffered.saturating_sub(1);
            counters.consumed += 1;
            if counters.paused && counters.buffered * 2 < self.high_water_mark {
                counters.paused = false;
                true
            } else {
                false
            }
        };
        if resume {
            debug!(high_water_mark = self.high_water_mark, "producer resumed");
            self.resumed.notify_waiters();
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn state(&self) -> BackpressureState {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        BackpressureState {
            buffered: counters.buffered,
            high_water_mark: self.high_water_mark,
            paused: counters.paused,
            pause_count: counters.pause_count,
            produced: counters.produced,
            consumed: counters.consumed,
        }
    }

    /// Returns true while the producer is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn try_admit(&self) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if counters.paused {
            return false;
        }
        counters.buffered += 1;
        counters.produced += 1;
        if counters.buffered >= self.high_water_mark {
            counters.paused = true;
            counters.pause_count += 1;
            debug!(buffered = counters.buffered, "high-water mark reached");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(high: usize) -> Arc<BackpressureController> {
        Arc::new(BackpressureController::new(NonZeroUsize::new(high).unwrap()))
    }

    #[tokio::test]
    async fn pauses_at_high_water_and_resumes_below_half() {
        let controller = controller(4);
        for _ in 0..4 {
            controller.acquire().await;
        }
        assert!(controller.is_paused());
        assert_eq!(controller.state().buffered, 4);

        let blocked = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        // 3 and 2 buffered are not below half of 4.
        controller.release();
        controller.release();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        controller.release();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("producer resumed")
            .unwrap();

        let state = controller.state();
        assert_eq!(state.buffered, 2);
        assert_eq!(state.pause_count, 1);
        assert_eq!(state.produced, 5);
        assert_eq!(state.consumed, 3);
    }

    #[tokio::test]
    async fn cancellation_releases_a_paused_producer() {
        let controller = controller(1);
        controller.acquire().await;

        let token = CancellationToken::new();
        let waiter = {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            tokio::spawn(async move { controller.acquire_or_cancel(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert_eq!(controller.state().produced, 1);
    }
}
