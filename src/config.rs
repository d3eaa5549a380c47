//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the json api listens.
//!     - EngineConfig: every timing constant of the sync engine.
//!     - DemoConfig: offline simulator toggle and tick.
//!     - LoggingConfig: default log filter.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

/// Sync engine tuning. Every field has a default, so a partial `[engine]`
/// table is fine.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// quiet period before a current-value burst is applied
    pub sensor_debounce_ms: u64,
    /// quiet period before a series burst is applied
    pub series_debounce_ms: u64,
    /// shared flush window of the batched mutator
    pub batch_window_ms: u64,
    /// staleness sweep period
    pub staleness_period_ms: u64,
    /// age after which a reading counts as stale
    pub staleness_threshold_ms: u64,
    /// trailing window kept from inbound series
    pub series_window_ms: u64,
    pub max_series_points: usize,
    /// actuator commands admitted per rate window
    pub rate_limit_capacity: usize,
    pub rate_limit_window_ms: u64,
    pub dedupe_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sensor_debounce_ms: 100,
            series_debounce_ms: 100,
            batch_window_ms: 50,
            staleness_period_ms: 1_000,
            staleness_threshold_ms: 60_000,
            series_window_ms: 12 * 60 * 60 * 1000,
            max_series_points: 1440,
            rate_limit_capacity: 5,
            rate_limit_window_ms: 1_000,
            dedupe_ttl_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn sensor_debounce(&self) -> Duration {
        Duration::from_millis(self.sensor_debounce_ms)
    }

    pub fn series_debounce(&self) -> Duration {
        Duration::from_millis(self.series_debounce_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn staleness_period(&self) -> Duration {
        Duration::from_millis(self.staleness_period_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_millis(self.dedupe_ttl_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DemoConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { enabled: true, interval_seconds: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Outcome of looking for `host.toml`
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf, HostConfig),
    Invalid(PathBuf, String),
    Defaults,
}

impl ConfigSource {
    /// the usable config, defaults when no valid file was found
    pub fn config(&self) -> HostConfig {
        match self {
            ConfigSource::File(_, config) => config.clone(),
            _ => HostConfig::default(),
        }
    }

    pub fn log(&self) {
        match self {
            ConfigSource::File(path, _) => info!("[CONFIG] Loaded from {}", path.display()),
            ConfigSource::Invalid(path, e) => {
                warn!("[CONFIG] Failed to load {}: {} - using defaults", path.display(), e)
            }
            ConfigSource::Defaults => warn!("[CONFIG] No config file found - using defaults"),
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Find and load the first config file on the search path.
    ///
    /// Runs before logging is installed (the log level lives in the file), so
    /// it reports what happened instead of logging it.
    pub fn discover() -> ConfigSource {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in paths {
            if path.exists() {
                return match Self::load(&path) {
                    Ok(config) => ConfigSource::File(path, config),
                    Err(e) => ConfigSource::Invalid(path, e.to_string()),
                };
            }
        }
        ConfigSource::Defaults
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        info!("┌─────────────────────────────────────────┐");
        info!("│           HOST CONFIGURATION            │");
        info!("├─────────────────────────────────────────┤");
        info!("│ Bind: {}", self.server.bind);
        info!("│ Demo Source: {} ({}s tick)", self.demo.enabled, self.demo.interval_seconds);
        info!("│ Debounce: sensor {}ms / series {}ms", self.engine.sensor_debounce_ms, self.engine.series_debounce_ms);
        info!("│ Batch Window: {}ms", self.engine.batch_window_ms);
        info!("│ Stale After: {}ms", self.engine.staleness_threshold_ms);
        info!("│ Log Level: {}", self.logging.level);
        info!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = HostConfig::parse("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(config.demo.enabled);
    }

    #[test]
    fn test_partial_engine_table() {
        let config = HostConfig::parse(
            r#"
            [engine]
            staleness_threshold_ms = 30000
            rate_limit_capacity = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.staleness_threshold(), Duration::from_secs(30));
        assert_eq!(config.engine.rate_limit_capacity, 2);
        assert_eq!(config.engine.batch_window_ms, 50);
    }

    #[test]
    fn test_debounce_defaults_match() {
        let engine = EngineConfig::default();
        assert_eq!(engine.sensor_debounce(), Duration::from_millis(100));
        assert_eq!(engine.series_debounce(), engine.sensor_debounce());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(HostConfig::parse("[engine\nfoo").is_err());
    }
}
