//! Observability utilities for toolflow.
//!
//! Installs a `tracing-subscriber` formatter driven by [`TelemetryConfig`] and
//! provides the spans the orchestrator wraps each batch in.

#![warn(missing_docs, clippy::pedantic)]

pub mod tracing_support;

pub use tracing_support::{LogFormat, TelemetryConfig, batch_span, init_tracing};
