//! Per-tool circuit breakers.
//!
//! ```text
//!   CLOSED ──(failure_threshold)──▶ OPEN ──(reset_timeout, on next attempt)──▶ HALF_OPEN
//!     ▲                              ▲                                            │
//!     │                              └───────────────(any failure)────────────────┤
//!     └──────────────────────(success_threshold successes)────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Tripped; calls fail immediately.
    Open,
    /// Probing whether the tool has recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Thresholds shared by every breaker in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    failure_threshold: NonZeroU32,
    success_threshold: NonZeroU32,
    reset_timeout: Duration,
}

impl BreakerConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(
        failure_threshold: NonZeroU32,
        success_threshold: NonZeroU32,
        reset_timeout: Duration,
    ) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            reset_timeout,
        }
    }

    /// Consecutive failures that open the breaker.
    #[must_use]
    pub const fn failure_threshold(&self) -> NonZeroU32 {
        self.failure_threshold
    }

    /// Consecutive half-open successes that close the breaker.
    #[must_use]
    pub const fn success_threshold(&self) -> NonZeroU32 {
        self.success_threshold
    }

    /// Time spent open before a probe is allowed.
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new(NonZeroU32::MIN.saturating_add(4), NonZeroU32::MIN.saturating_add(1), Duration::from_secs(30))
    }
}

/// Fast-fail rejection returned while a breaker is open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit breaker for `{name}` is open; retry in {retry_in:?}")]
pub struct BreakerOpen {
    /// Breaker (tool) name.
    pub name: String,
    /// Time left until a probe is allowed.
    pub retry_in: Duration,
}

/// Outcome of [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerCallError<E> {
    /// The breaker rejected the call without running it.
    #[error(transparent)]
    Open(BreakerOpen),
    /// The wrapped operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Diagnostic view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Breaker (tool) name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since entering half-open.
    pub half_open_successes: u32,
    /// Milliseconds since the last failure, if any.
    pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            last_failure: None,
        }
    }
}

/// Guards one tool against cascading failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stored state.
    ///
    /// An open breaker whose timeout has elapsed still reports `Open` until
    /// the next attempt moves it to half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Checks whether a call may proceed.
    ///
    /// An open breaker moves to half-open here, lazily, once the reset timeout
    /// has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerOpen`] while the breaker is open.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        let mut guard = self.lock();
        if guard.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = guard.opened_at.map_or(self.config.reset_timeout, |at| at.elapsed());
        if elapsed >= self.config.reset_timeout {
            guard.state = CircuitState::HalfOpen;
            guard.half_open_successes = 0;
            info!(breaker = %self.name, "circuit half-open; probing");
            return Ok(());
        }

        Err(BreakerOpen {
            name: self.name.clone(),
            retry_in: self.config.reset_timeout - elapsed,
        })
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut guard = self.lock();
        guard.consecutive_failures = 0;
        if guard.state == CircuitState::HalfOpen {
            guard.half_open_successes += 1;
            if guard.half_open_successes >= self.config.success_threshold.get() {
                *guard = BreakerState::closed();
                info!(breaker = %self.name, "circuit closed");
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut guard = self.lock();
        let now = Instant::now();
        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
        guard.last_failure = Some(now);
        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(now);
                guard.half_open_successes = 0;
                warn!(breaker = %self.name, "probe failed; circuit re-opened");
            }
            CircuitState::Closed
                if guard.consecutive_failures >= self.config.failure_threshold.get() =>
            {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(now);
                warn!(
                    breaker = %self.name,
                    failures = guard.consecutive_failures,
                    "failure threshold reached; circuit opened"
                );
            }
            _ => {
                debug!(breaker = %self.name, failures = guard.consecutive_failures, "failure recorded");
            }
        }
    }

    /// Runs `operation` through the breaker, recording its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerCallError::Open`] without running `operation` while the
    /// breaker is open, or [`BreakerCallError::Inner`] when it fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire().map_err(BreakerCallError::Open)?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(BreakerCallError::Inner(error))
            }
        }
    }

    /// Forces the breaker closed and clears its history.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
    }

    /// Returns a diagnostic snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let guard = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            half_open_successes: guard.half_open_successes,
            since_last_failure_ms: guard
                .last_failure
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazily creates one breaker per tool name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Creates a registry whose breakers share `config`.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config))),
        )
    }

    /// Returns snapshots of every breaker, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|breaker| breaker.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Resets the breaker for `name`, returning whether it existed.
    pub fn reset(&self, name: &str) -> bool {
        let breaker = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        breaker.is_some_and(|breaker| {
            breaker.reset();
            true
        })
    }

    /// Drops every breaker.
    pub fn reset_all(&self) {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(reset_ms: u64) -> BreakerConfig {
        BreakerConfig::new(
            NonZeroU32::new(3).unwrap(),
            NonZeroU32::new(2).unwrap(),
            Duration::from_millis(reset_ms),
        )
    }

    #[tokio::test]
    async fn open_breaker_never_invokes_the_operation() {
        let breaker = CircuitBreaker::new("flaky", config(60_000));
        for _ in 0..3 {
            let result: Result<(), _> = breaker.call(|| async { Err::<(), _>("boom") }).await;
            assert!(matches!(result, Err(BreakerCallError::Inner("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerCallError::Open(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new("flaky", config(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.try_acquire().is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Still reported open until an attempt is made.
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new("flaky", config(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        breaker.try_acquire().unwrap();

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        let open = breaker.try_acquire().unwrap_err();
        assert_eq!(open.name, "flaky");
        assert!(open.retry_in <= Duration::from_millis(20));
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new("t", config(1_000));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_shares_breakers_per_tool() {
        let registry = BreakerRegistry::new(config(1_000));
        let first = registry.get("read_file");
        for _ in 0..3 {
            first.record_failure();
        }
        assert_eq!(registry.get("read_file").state(), CircuitState::Open);
        assert_eq!(registry.get("write_file").state(), CircuitState::Closed);

        let names: Vec<_> = registry.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["read_file", "write_file"]);

        assert!(registry.reset("read_file"));
        assert!(!registry.reset("missing"));
        assert_eq!(registry.get("read_file").state(), CircuitState::Closed);
    }
}
