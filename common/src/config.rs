//! Engine-wide configuration.
//!
//! Per-source pool sizing lives on [`crate::models::SourceConfig`]; this module
//! only holds knobs shared by every source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log output format for [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Statement execution timeout in milliseconds.
    pub query_timeout_ms: u64,
    /// Hard cap on rows returned by a read query. `0` disables the cap.
    pub max_rows: u32,
    /// Rows buffered per read before growing the result.
    pub fetch_size: u32,
    /// Concurrent executions allowed on the async worker pool.
    pub async_workers: usize,
    /// Timeout of the connectivity probe run by `add` and `test_connection`.
    pub probe_timeout_secs: u64,
    /// How long `remove`/`shutdown` wait for a pool to close.
    pub pool_close_timeout_secs: u64,
    /// Interval of the background health check.
    pub health_check_interval_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 30_000,
            max_rows: 10_000,
            fetch_size: 1_000,
            async_workers: 8,
            probe_timeout_secs: 5,
            pool_close_timeout_secs: 10,
            health_check_interval_secs: 60,
            log_format: LogFormat::Pretty,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from `ENGINE_*` environment variables.
    ///
    /// A `.env` file in the working directory is read first (best-effort);
    /// absent or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to read .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            query_timeout_ms: parsed("ENGINE_QUERY_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.query_timeout_ms),
            max_rows: parsed("ENGINE_MAX_ROWS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_rows),
            fetch_size: parsed("ENGINE_FETCH_SIZE")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.fetch_size),
            async_workers: parsed("ENGINE_ASYNC_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.async_workers),
            probe_timeout_secs: parsed("ENGINE_PROBE_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.probe_timeout_secs),
            pool_close_timeout_secs: parsed("ENGINE_POOL_CLOSE_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.pool_close_timeout_secs),
            health_check_interval_secs: parsed("ENGINE_HEALTH_CHECK_INTERVAL_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.health_check_interval_secs),
            log_format: lookup("ENGINE_LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn pool_close_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_close_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ENGINE_QUERY_TIMEOUT_MS", "1500"),
            ("ENGINE_MAX_ROWS", "0"),
            ("ENGINE_ASYNC_WORKERS", "2"),
            ("ENGINE_LOG_FORMAT", "JSON"),
        ]));
        assert_eq!(config.query_timeout_ms, 1500);
        assert_eq!(config.max_rows, 0);
        assert_eq!(config.async_workers, 2);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ENGINE_FETCH_SIZE", "lots"),
            ("ENGINE_ASYNC_WORKERS", "0"),
            ("ENGINE_LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.fetch_size, 1_000);
        assert_eq!(config.async_workers, 8);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }
}
