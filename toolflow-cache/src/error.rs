//! Error types for the cache subsystem.

use thiserror::Error;

/// Errors emitted by cache components.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The provided configuration was invalid.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
