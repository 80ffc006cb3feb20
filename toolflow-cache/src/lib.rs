//! Result cache for tool outputs.
//!
//! Entries are keyed by a canonical hash of the tool name and its full
//! parameter set, expire lazily on read (and optionally via a background
//! sweep), and are evicted through a pluggable [`EvictionPolicy`] whenever the
//! configured entry or byte budget would be exceeded.

#![warn(missing_docs, clippy::pedantic)]

mod entry;
mod error;
mod key;
mod policy;
mod store;

pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, canonical_json};
pub use policy::{
    EvictionPolicy, EvictionStrategy, LargestFirst, LeastFrequentlyUsed, LeastRecentlyUsed,
    SoonestExpiring,
};
pub use store::{CacheConfig, CacheStats, ResultCache};
