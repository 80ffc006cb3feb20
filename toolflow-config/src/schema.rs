//! Strongly typed configuration schemas.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolflow_cache::EvictionStrategy;
use toolflow_telemetry::TelemetryConfig;

use crate::{ConfigError, ConfigResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on calls in flight within one batch.
    pub max_concurrency: usize,
    /// Cancel the remaining calls after the first hard failure.
    pub fail_fast: bool,
    /// Serve and populate cacheable results.
    pub use_cache: bool,
    /// Result cache settings.
    pub cache: CacheSettings,
    /// Circuit breaker settings.
    pub breaker: BreakerSettings,
    /// Retry settings for transient failures.
    pub retry: RetrySettings,
    /// Progress stream settings.
    pub stream: StreamSettings,
    /// Approval rule lists.
    pub approval: ApprovalSettings,
    /// Logging setup.
    pub telemetry: TelemetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            fail_fast: false,
            use_cache: true,
            cache: CacheSettings::default(),
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            stream: StreamSettings::default(),
            approval: ApprovalSettings::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks every field for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        fn positive(value: u64, field: &'static str) -> ConfigResult<()> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
            Ok(())
        }

        positive(self.max_concurrency as u64, "max_concurrency")?;
        positive(self.cache.max_entries as u64, "cache.max_entries")?;
        if let Some(max_bytes) = self.cache.max_bytes {
            positive(max_bytes as u64, "cache.max_bytes")?;
        }
        positive(self.cache.default_ttl_ms, "cache.default_ttl_ms")?;
        positive(self.cache.sweep_interval_ms, "cache.sweep_interval_ms")?;
        positive(u64::from(self.breaker.failure_threshold), "breaker.failure_threshold")?;
        positive(u64::from(self.breaker.success_threshold), "breaker.success_threshold")?;
        positive(self.breaker.reset_timeout_ms, "breaker.reset_timeout_ms")?;
        positive(u64::from(self.retry.max_attempts), "retry.max_attempts")?;
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.max_delay_ms",
                reason: "must not be smaller than retry.base_delay_ms",
            });
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: "must be a finite number of at least 1.0",
            });
        }
        positive(self.stream.high_water_mark as u64, "stream.high_water_mark")?;
        Ok(())
    }
}

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Optional byte budget across all values.
    pub max_bytes: Option<usize>,
    /// TTL applied to cached results, in milliseconds.
    pub default_ttl_ms: u64,
    /// Eviction strategy on overflow.
    pub eviction: EvictionStrategy,
    /// Interval of the background expiry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Scope cache keys to the tool contract version.
    pub include_tool_version: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: None,
            default_ttl_ms: 300_000,
            eviction: EvictionStrategy::Lru,
            sweep_interval_ms: 60_000,
            include_tool_version: true,
        }
    }
}

impl CacheSettings {
    /// Returns the default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Returns the sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Circuit breaker settings, applied to every tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// Time spent open before a probe is allowed, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
        }
    }
}

impl BreakerSettings {
    /// Returns the reset timeout.
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Retry settings for transient failures of retryable tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Progress stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Buffered events at which the producer pauses.
    pub high_water_mark: usize,
    /// Recovery strategies tried before a stream failure is surfaced.
    pub max_recovery_attempts: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            high_water_mark: 256,
            max_recovery_attempts: 2,
        }
    }
}

/// Approval rule lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Tools that never prompt.
    pub auto_approve_tools: Vec<String>,
    /// Tool categories that never prompt.
    pub auto_approve_categories: Vec<String>,
    /// Tools that are always rejected.
    pub always_deny_tools: Vec<String>,
    /// Tool categories that are always rejected.
    pub always_deny_categories: Vec<String>,
}
