//! Shared error definitions for toolflow primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the primitives crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided batch identifier could not be parsed.
    #[error("invalid batch id: {source}")]
    InvalidBatchId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Call identifier failed validation.
    #[error("invalid call id `{id}`: {reason}")]
    InvalidCallId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool call definition failed validation.
    #[error("invalid tool call: {reason}")]
    InvalidCall {
        /// Human-readable reason for rejection.
        reason: String,
    },
}
