//! Core shared types for the toolflow orchestration engine.

#![warn(missing_docs, clippy::pedantic)]

mod call;
mod category;
mod error;
mod ids;

/// Tool call descriptors submitted in a batch.
pub use call::{ToolCall, ToolCallBuilder};
/// Failure taxonomy shared by every layer of the engine.
pub use category::ErrorCategory;
/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
/// Identifiers for calls and batches.
pub use ids::{BatchId, CallId};
