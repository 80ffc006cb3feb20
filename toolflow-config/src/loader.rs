//! Configuration loader implementations.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use toolflow_cache::EvictionStrategy;
use tracing::{debug, info};

use crate::schema::EngineConfig;
use crate::{ConfigError, ConfigResult, LogFormat};

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "TOOLFLOW_";

impl EngineConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error naming the file when it cannot be read, parsed, or
    /// validated.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let config = Self::from_json_str(&raw)
            .with_context(|| format!("failed to parse configuration from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Builds the default configuration overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparsable overrides.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Applies `TOOLFLOW_*` overrides from `vars`.
    ///
    /// List variables take comma-separated values. Unrecognised variables with
    /// the prefix are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for the first value that fails to
    /// parse.
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "MAX_CONCURRENCY" => self.max_concurrency = parse(key, value)?,
                "FAIL_FAST" => self.fail_fast = parse_bool(key, value)?,
                "USE_CACHE" => self.use_cache = parse_bool(key, value)?,
                "CACHE_MAX_ENTRIES" => self.cache.max_entries = parse(key, value)?,
                "CACHE_MAX_BYTES" => self.cache.max_bytes = Some(parse(key, value)?),
                "CACHE_TTL_MS" => self.cache.default_ttl_ms = parse(key, value)?,
                "CACHE_EVICTION" => self.cache.eviction = parse_eviction(key, value)?,
                "CACHE_SWEEP_INTERVAL_MS" => self.cache.sweep_interval_ms = parse(key, value)?,
                "CACHE_INCLUDE_TOOL_VERSION" => {
                    self.cache.include_tool_version = parse_bool(key, value)?;
                }
                "BREAKER_FAILURE_THRESHOLD" => self.breaker.failure_threshold = parse(key, value)?,
                "BREAKER_SUCCESS_THRESHOLD" => self.breaker.success_threshold = parse(key, value)?,
                "BREAKER_RESET_TIMEOUT_MS" => self.breaker.reset_timeout_ms = parse(key, value)?,
                "RETRY_MAX_ATTEMPTS" => self.retry.max_attempts = parse(key, value)?,
                "RETRY_BASE_DELAY_MS" => self.retry.base_delay_ms = parse(key, value)?,
                "RETRY_MAX_DELAY_MS" => self.retry.max_delay_ms = parse(key, value)?,
                "RETRY_MULTIPLIER" => self.retry.multiplier = parse(key, value)?,
                "STREAM_HIGH_WATER_MARK" => self.stream.high_water_mark = parse(key, value)?,
                "STREAM_MAX_RECOVERY_ATTEMPTS" => {
                    self.stream.max_recovery_attempts = parse(key, value)?;
                }
                "AUTO_APPROVE_TOOLS" => self.approval.auto_approve_tools = split_list(value),
                "AUTO_APPROVE_CATEGORIES" => {
                    self.approval.auto_approve_categories = split_list(value);
                }
                "ALWAYS_DENY_TOOLS" => self.approval.always_deny_tools = split_list(value),
                "ALWAYS_DENY_CATEGORIES" => self.approval.always_deny_categories = split_list(value),
                "LOG" => self.telemetry.filter = value.to_owned(),
                "LOG_FORMAT" => self.telemetry.format = parse_format(key, value)?,
                _ => {
                    debug!(key, "ignoring unrecognised environment override");
                    continue;
                }
            }
            debug!(key, "applied environment override");
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: reason.into(),
    }
}

fn parse<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|error: T::Err| invalid(key, value, error.to_string()))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_eviction(key: &str, value: &str) -> ConfigResult<EvictionStrategy> {
    match value.to_ascii_lowercase().as_str() {
        "lru" => Ok(EvictionStrategy::Lru),
        "lfu" => Ok(EvictionStrategy::Lfu),
        "ttl" => Ok(EvictionStrategy::Ttl),
        "size" => Ok(EvictionStrategy::Size),
        _ => Err(invalid(key, value, "expected one of lru, lfu, ttl, size")),
    }
}

fn parse_format(key: &str, value: &str) -> ConfigResult<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "compact" => Ok(LogFormat::Compact),
        "pretty" => Ok(LogFormat::Pretty),
        _ => Err(invalid(key, value, "expected compact or pretty")),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "max_concurrency": 3, "cache": { "eviction": "lfu" }, "approval": { "always_deny_tools": ["rm"] } }"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.cache.eviction, EvictionStrategy::Lfu);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.approval.always_deny_tools, ["rm"]);
        assert!(config.use_cache);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply_and_ignore_foreign_keys() {
        let mut config = EngineConfig::default();
        config
            .apply_env_overrides([
                ("TOOLFLOW_MAX_CONCURRENCY", "2"),
                ("TOOLFLOW_FAIL_FAST", "yes"),
                ("TOOLFLOW_CACHE_EVICTION", "size"),
                ("TOOLFLOW_CACHE_MAX_BYTES", "4096"),
                ("TOOLFLOW_AUTO_APPROVE_TOOLS", "read_file, list_files,,"),
                ("TOOLFLOW_LOG_FORMAT", "pretty"),
                ("TOOLFLOW_SOMETHING_ELSE", "x"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();

        assert_eq!(config.max_concurrency, 2);
        assert!(config.fail_fast);
        assert_eq!(config.cache.eviction, EvictionStrategy::Size);
        assert_eq!(config.cache.max_bytes, Some(4096));
        assert_eq!(config.approval.auto_approve_tools, ["read_file", "list_files"]);
        assert_eq!(config.telemetry.format, LogFormat::Pretty);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut config = EngineConfig::default();
        let error = config
            .apply_env_overrides([("TOOLFLOW_MAX_CONCURRENCY", "many")])
            .unwrap_err();
        assert!(error.to_string().contains("TOOLFLOW_MAX_CONCURRENCY"));
    }

    #[test]
    fn load_from_path_validates() {
        let dir = std::env::temp_dir().join(format!("toolflow-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.json");
        fs::File::create(&good)
            .unwrap()
            .write_all(br#"{ "retry": { "max_attempts": 5 } }"#)
            .unwrap();
        assert_eq!(EngineConfig::load_from_path(&good).unwrap().retry.max_attempts, 5);

        let bad = dir.join("bad.json");
        fs::File::create(&bad)
            .unwrap()
            .write_all(br#"{ "max_concurrency": 0 }"#)
            .unwrap();
        let error = EngineConfig::load_from_path(&bad).unwrap_err();
        assert!(format!("{error:#}").contains("max_concurrency"));

        let missing = dir.join("missing.json");
        assert!(EngineConfig::load_from_path(&missing).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
