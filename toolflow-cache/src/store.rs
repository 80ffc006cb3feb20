//! Bounded, TTL-aware result store.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::entry::CacheEntry;
use crate::key::CacheKey;
use crate::policy::{EvictionPolicy, LeastRecentlyUsed};
use crate::{CacheError, CacheResult};

/// Configuration for the result cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    max_entries: NonZeroUsize,
    max_bytes: Option<NonZeroUsize>,
    default_ttl: Duration,
}

impl CacheConfig {
    /// Creates a configuration with the provided entry capacity.
    #[must_use]
    pub fn new(max_entries: NonZeroUsize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    /// Sets the optional byte budget across all cached values.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: NonZeroUsize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Sets the TTL applied when [`ResultCache::set`] receives no explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] when `ttl` is zero.
    pub fn with_default_ttl(mut self, ttl: Duration) -> CacheResult<Self> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidConfig("default ttl must be non-zero"));
        }
        self.default_ttl = ttl;
        Ok(self)
    }

    /// Returns the configured entry capacity.
    #[must_use]
    pub const fn max_entries(self) -> NonZeroUsize {
        self.max_entries
    }

    /// Returns the byte budget, if configured.
    #[must_use]
    pub const fn max_bytes(self) -> Option<NonZeroUsize> {
        self.max_bytes
    }

    /// Returns the default TTL.
    #[must_use]
    pub const fn default_ttl(self) -> Duration {
        self.default_ttl
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            max_bytes: None,
            default_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes());
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Memoization store for tool results.
///
/// Safe to share across concurrent calls: different keys never wait on each
/// other beyond a short critical section, and
/// [`get_or_try_insert_with`](Self::get_or_try_insert_with) guarantees at most
/// one in-flight computation per key.
pub struct ResultCache {
    config: CacheConfig,
    policy: Arc<dyn EvictionPolicy>,
    inner: Mutex<CacheInner>,
    inflight: std::sync::Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Creates a cache that evicts least-recently-used entries.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_policy(config, Arc::new(LeastRecentlyUsed))
    }

    /// Creates a cache that delegates eviction to `policy`.
    #[must_use]
    pub fn with_policy(config: CacheConfig, policy: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            config,
            policy,
            inner: Mutex::new(CacheInner::default()),
            inflight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns the cached value, treating expired entries as absent.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        self.lookup(key, true).await
    }

    async fn lookup(&self, key: &CacheKey, record_miss: bool) -> Option<Value> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(now);
                inner.hits += 1;
                return Some(entry.value().clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            trace!(key = %key, "expired cache entry evicted on read");
        }
        if record_miss {
            inner.misses += 1;
        }
        None
    }

    /// Stores `value` under `key` for `ttl` (or the default TTL), first
    /// evicting other entries until the new one fits.
    ///
    /// The entry being stored is never chosen as a victim. A value larger than
    /// the whole byte budget is not cached; any previous value for `key` is
    /// dropped and `false` is returned.
    pub async fn set(&self, key: CacheKey, value: Value, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.config.default_ttl()), now);
        let incoming = entry.size_bytes();
        let mut guard = self.inner.lock().await;
        guard.remove(&key);

        if self
            .config
            .max_bytes()
            .is_some_and(|limit| incoming > limit.get())
        {
            debug!(key = %key, size_bytes = incoming, "value exceeds the cache byte budget");
            return false;
        }

        self.make_room(&mut guard, incoming, now);
        guard.total_bytes += incoming;
        guard.entries.insert(key, entry);
        true
    }

    fn make_room(&self, inner: &mut CacheInner, incoming: usize, now: Instant) {
        if !self.needs_room(inner, incoming) {
            return;
        }

        inner.purge_expired(now);
        while self.needs_room(inner, incoming) {
            let Some(victim) = self.policy.select_victim(&inner.entries).cloned() else {
                break;
            };
            inner.remove(&victim);
            inner.evictions += 1;
            debug!(key = %victim, policy = self.policy.name(), "cache entry evicted");
        }
    }

    fn needs_room(&self, inner: &CacheInner, incoming: usize) -> bool {
        inner.entries.len() >= self.config.max_entries().get()
            || self
                .config
                .max_bytes()
                .is_some_and(|limit| inner.total_bytes + incoming > limit.get())
    }

    /// Returns `true` when a live entry exists for `key`.
    pub async fn has(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        match guard.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                guard.remove(key);
                guard.expirations += 1;
                false
            }
            None => false,
        }
    }

    /// Removes the entry for `key`, returning whether one existed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.inner.lock().await.remove(key).is_some()
    }

    /// Drops every entry. Hit and miss counters are preserved.
    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.entries.clear();
        guard.total_bytes = 0;
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let mut guard = self.inner.lock().await;
        guard.purge_expired(Instant::now())
    }

    /// Returns a snapshot of cache utilisation.
    pub async fn stats(&self) -> CacheStats {
        let guard = self.inner.lock().await;
        let lookups = guard.hits + guard.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            guard.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: guard.hits,
            misses: guard.misses,
            hit_rate,
            size: guard.entries.len(),
            max_size: self.config.max_entries().get(),
            total_bytes: guard.total_bytes,
            max_bytes: self.config.max_bytes().map(NonZeroUsize::get),
            evictions: guard.evictions,
            expirations: guard.expirations,
        }
    }

    /// Returns the cached value for `key` or computes it with `init`.
    ///
    /// Concurrent callers for the same key wait for the first computation and
    /// are served its result from the cache. Failed computations are not cached;
    /// a waiter that finds no value after the leader fails runs `init` itself.
    /// The boolean is `true` when the value came from the cache.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        init: F,
    ) -> Result<(Value, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.lookup(&key, false).await {
            return Ok((value, true));
        }

        let slot = self.inflight_slot(&key);
        let permit = slot.lock().await;

        if let Some(value) = self.lookup(&key, true).await {
            drop(permit);
            self.release_slot(&key, &slot);
            return Ok((value, true));
        }

        let result = init().await;
        if let Ok(value) = &result {
            self.set(key.clone(), value.clone(), ttl).await;
        }

        drop(permit);
        self.release_slot(&key, &slot);
        result.map(|value| (value, false))
    }

    fn inflight_slot(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(inflight.entry(key.clone()).or_default())
    }

    fn release_slot(&self, key: &CacheKey, slot: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = inflight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) <= 2);
        if idle {
            inflight.remove(key);
        }
    }

    /// Spawns a task that sweeps expired entries every `interval`.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped; abort the returned handle to stop it earlier.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired().await;
                if removed > 0 {
                    debug!(removed, "cache sweep removed expired entries");
                }
            }
        })
    }
}

/// Snapshot describing cache utilisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` before the first lookup.
    pub hit_rate: f64,
    /// Entries currently stored.
    pub size: usize,
    /// Maximum number of entries permitted.
    pub max_size: usize,
    /// Accumulated serialized bytes currently retained.
    pub total_bytes: usize,
    /// Optional byte budget when configured.
    pub max_bytes: Option<usize>,
    /// Entries removed by the eviction policy.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
}
