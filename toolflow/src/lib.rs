//! Tool-call orchestration SDK facade.
//!
//! Depend on this crate via `cargo add toolflow`. It bundles the internal
//! crates behind feature flags so downstream users can enable only the
//! components they need.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use toolflow_primitives as primitives;

/// Tool contracts and registry.
pub use toolflow_tools as tools;

/// Dependency resolution and batch execution (enabled by `engine` feature).
#[cfg(feature = "engine")]
pub use toolflow_engine as engine;

/// Result cache (enabled by `cache` feature).
#[cfg(feature = "cache")]
pub use toolflow_cache as cache;

/// Approval gate and rules (enabled by `approval` feature).
#[cfg(feature = "approval")]
pub use toolflow_approval as approval;

/// Progress streaming with backpressure (enabled by `stream` feature).
#[cfg(feature = "stream")]
pub use toolflow_stream as stream;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use toolflow_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use toolflow_telemetry as telemetry;
