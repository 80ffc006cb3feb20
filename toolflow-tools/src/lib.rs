//! Tool contracts and the registry the orchestrator resolves them from.
//!
//! A [`ToolContract`](registry::ToolContract) is a fixed capability record:
//! the orchestrator branches on its flags (`cacheable`, `requires_approval`,
//! `retryable`, timeout) and never on the concrete tool type.

#![warn(missing_docs, clippy::pedantic)]

pub mod classify;
pub mod registry;

pub use classify::classify_message;
pub use registry::{
    Tool, ToolContract, ToolError, ToolHandle, ToolProvider, ToolRegistry, ToolResult,
};
