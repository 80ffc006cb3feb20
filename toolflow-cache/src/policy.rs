//! Eviction strategies the cache delegates overflow decisions to.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Chooses which entry to drop when the cache is over budget.
///
/// The cache calls [`select_victim`](Self::select_victim) repeatedly until it
/// is back within its entry and byte limits, so a policy only ever has to pick
/// one entry at a time.
pub trait EvictionPolicy: Send + Sync + Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Returns the key of the entry to evict, or `None` if `entries` is empty.
    fn select_victim<'a>(&self, entries: &'a HashMap<CacheKey, CacheEntry>)
    -> Option<&'a CacheKey>;
}

/// Evicts the entry that was read least recently.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUsed;

impl EvictionPolicy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn select_victim<'a>(
        &self,
        entries: &'a HashMap<CacheKey, CacheEntry>,
    ) -> Option<&'a CacheKey> {
        entries
            .iter()
            .min_by_key(|(_, entry)| (entry.last_access(), entry.created_at()))
            .map(|(key, _)| key)
    }
}

/// Evicts the entry with the fewest reads, oldest access first on ties.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastFrequentlyUsed;

impl EvictionPolicy for LeastFrequentlyUsed {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn select_victim<'a>(
        &self,
        entries: &'a HashMap<CacheKey, CacheEntry>,
    ) -> Option<&'a CacheKey> {
        entries
            .iter()
            .min_by_key(|(_, entry)| (entry.access_count(), entry.last_access()))
            .map(|(key, _)| key)
    }
}

/// Evicts the entry closest to expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoonestExpiring;

impl EvictionPolicy for SoonestExpiring {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn select_victim<'a>(
        &self,
        entries: &'a HashMap<CacheKey, CacheEntry>,
    ) -> Option<&'a CacheKey> {
        entries
            .iter()
            .min_by_key(|(_, entry)| (entry.expires_at(), entry.created_at()))
            .map(|(key, _)| key)
    }
}

/// Evicts the largest entry first, freeing the byte budget fastest.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirst;

impl EvictionPolicy for LargestFirst {
    fn name(&self) -> &'static str {
        "size"
    }

    fn select_victim<'a>(
        &self,
        entries: &'a HashMap<CacheKey, CacheEntry>,
    ) -> Option<&'a CacheKey> {
        entries
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.size_bytes()
                    .cmp(&b.size_bytes())
                    .then_with(|| b.last_access().cmp(&a.last_access()))
            })
            .map(|(key, _)| key)
    }
}

/// Configuration-friendly selector for the built-in policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// [`LeastRecentlyUsed`].
    #[default]
    Lru,
    /// [`LeastFrequentlyUsed`].
    Lfu,
    /// [`SoonestExpiring`].
    Ttl,
    /// [`LargestFirst`].
    Size,
}

impl EvictionStrategy {
    /// Instantiates the policy for this strategy.
    #[must_use]
    pub fn into_policy(self) -> Arc<dyn EvictionPolicy> {
        match self {
            Self::Lru => Arc::new(LeastRecentlyUsed),
            Self::Lfu => Arc::new(LeastFrequentlyUsed),
            Self::Ttl => Arc::new(SoonestExpiring),
            Self::Size => Arc::new(LargestFirst),
        }
    }
}
