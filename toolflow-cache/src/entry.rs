//! Cache entry bookkeeping.

use std::time::{Duration, Instant};

use serde_json::Value;

// Far-future fallback for TTLs that overflow `Instant`.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A memoized value plus the metadata eviction policies rank it by.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
    last_access: Instant,
    access_count: u64,
    size_bytes: usize,
}

impl CacheEntry {
    pub(crate) fn new(value: Value, ttl: Duration, now: Instant) -> Self {
        let size_bytes = value.to_string().len();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);
        Self {
            value,
            created_at: now,
            expires_at,
            last_access: now,
            access_count: 0,
            size_bytes,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_access = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Returns the cached value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns when the entry was inserted.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when the entry stops being served.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns the last time the entry was read.
    #[must_use]
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Returns how many times the entry has been read.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Returns the serialized size of the value in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
