//! Bounded worker pool for call dispatch.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Errors produced while waiting for a worker slot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Dispatch was cancelled while waiting for a slot.
    #[error("worker pool acquisition cancelled")]
    Cancelled,
}

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Limits how many calls run at once across a whole batch.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    capacity: NonZeroUsize,
}

impl WorkerPool {
    /// Creates a pool with `capacity` slots.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.get())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Returns how many permits are currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns the highest number of permits held at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> PoolResult<WorkerPermit> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                // The semaphore is private and never closed.
                permit.map_err(|_| PoolError::Cancelled)?
            }
        };

        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Ok(WorkerPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Slot in a [`WorkerPool`]; released on drop.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
