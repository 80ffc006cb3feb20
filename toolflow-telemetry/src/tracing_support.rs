//! Structured tracing helpers.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use toolflow_primitives::BatchId;
use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Output style of the formatter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line records.
    #[default]
    Compact,
    /// Multi-line, human-oriented records.
    Pretty,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Formatter style.
    pub format: LogFormat,
    /// Whether to print the event target.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` overrides the configured filter when it is set and valid.
/// Returns `Ok(false)` when a global subscriber was already installed.
///
/// # Errors
///
/// Returns an error when the configured filter directive cannot be parsed.
pub fn init_tracing(config: &TelemetryConfig) -> anyhow::Result<bool> {
    let configured = EnvFilter::try_new(&config.filter)
        .with_context(|| format!("invalid log filter `{}`", config.filter))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_level(true);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    Ok(installed.is_ok())
}

/// Span wrapping one batch execution.
#[must_use]
pub fn batch_span(batch_id: BatchId, total_calls: usize) -> Span {
    tracing::info_span!("batch", batch_id = %batch_id, total_calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_a_no_op() {
        let config = TelemetryConfig::default();
        init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let config = TelemetryConfig {
            filter: "toolflow=notalevel".into(),
            ..TelemetryConfig::default()
        };
        let error = init_tracing(&config).unwrap_err();
        assert!(error.to_string().contains("invalid log filter"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: TelemetryConfig = serde_json::from_str(r#"{ "format": "pretty" }"#).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn batch_span_carries_batch_fields() {
        let span = batch_span(BatchId::random(), 3);
        let _entered = span.enter();
    }
}
