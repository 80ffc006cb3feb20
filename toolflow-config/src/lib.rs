//! Configuration management for toolflow.
//!
//! [`EngineConfig`] is a plain serde structure with a default for every
//! field. It can be read from JSON, adjusted with `TOOLFLOW_*` environment
//! variables, and validated before the orchestrator is built from it.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

use thiserror::Error;

pub use schema::{
    ApprovalSettings, BreakerSettings, CacheSettings, EngineConfig, RetrySettings,
    StreamSettings,
};
pub use toolflow_telemetry::{LogFormat, TelemetryConfig};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override carried an unusable value.
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// A field failed validation.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
