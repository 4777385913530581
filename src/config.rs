//! Configuration: a TOML file deserialized with `serde(default)` per field,
//! overridable by environment variables. Missing required fields (exchange
//! list) are a fatal `ConfigurationError` at construction, matching the
//! teacher's `performance::config::PerfConfig::load`/`from_env` shape.

use crate::domain::CandleInterval;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub exchange: String,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub settings: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tick_buffer_size: usize,
    pub flush_interval_seconds: u64,
    pub candle_intervals: Vec<CandleInterval>,
    pub in_memory_candle_retention_minutes: i64,
    pub cooldown_seconds: i64,
    pub max_concurrent_notifications: usize,
    pub status_probe_interval_seconds: u64,
    pub redis_url: Option<String>,
    pub database_url: String,
    pub exchanges: Vec<ExchangeConfig>,
    pub channels: Vec<ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_buffer_size: 500,
            flush_interval_seconds: 10,
            candle_intervals: CandleInterval::ALL.to_vec(),
            in_memory_candle_retention_minutes: 120,
            cooldown_seconds: 300,
            max_concurrent_notifications: 10,
            status_probe_interval_seconds: 30,
            redis_url: None,
            database_url: "tick_aggregator.db".to_string(),
            exchanges: Vec::new(),
            channels: vec![ChannelConfig {
                name: "console".to_string(),
                kind: "console".to_string(),
                enabled: true,
                settings: std::collections::HashMap::new(),
            }],
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| AppError::Configuration(format!("cannot read config file: {e}")))?;
        let mut config: Self = toml::from_str(&contents)
            .map_err(|e| AppError::Configuration(format!("invalid config file: {e}")))?;
        config.apply_env_overrides();
        config.validate()
    }

    /// Reads `TICK_AGGREGATOR_CONFIG_PATH` (default `config.toml`); falls
    /// back to defaults-plus-env-overrides if the file is absent.
    pub fn from_env() -> AppResult<Self> {
        Self::from_path_or_env(None)
    }

    /// Like [`Config::from_env`], but an explicit `path` (e.g. a `--config`
    /// CLI flag) takes precedence over `TICK_AGGREGATOR_CONFIG_PATH`.
    pub fn from_path_or_env(path: Option<&Path>) -> AppResult<Self> {
        let path = path
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| env::var("TICK_AGGREGATOR_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config.toml".to_string());
        match Self::load(&path) {
            Ok(config) => Ok(config),
            Err(_) => {
                tracing::debug!(path = %path, "no config file found, using defaults with env overrides");
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env::var("TICK_BUFFER_SIZE").ok().and_then(|v| v.parse().ok()) {
            self.tick_buffer_size = v;
        }
        if let Some(v) = env::var("FLUSH_INTERVAL_SECONDS").ok().and_then(|v| v.parse().ok()) {
            self.flush_interval_seconds = v;
        }
        if let Some(v) = env::var("IN_MEMORY_CANDLE_RETENTION_MINUTES").ok().and_then(|v| v.parse().ok()) {
            self.in_memory_candle_retention_minutes = v;
        }
        if let Some(v) = env::var("COOLDOWN_SECONDS").ok().and_then(|v| v.parse().ok()) {
            self.cooldown_seconds = v;
        }
        if let Some(v) = env::var("MAX_CONCURRENT_NOTIFICATIONS").ok().and_then(|v| v.parse().ok()) {
            self.max_concurrent_notifications = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = env::var("REDIS_URL") {
            self.redis_url = Some(v);
        }
    }

    fn validate(self) -> AppResult<Self> {
        if self.exchanges.is_empty() {
            return Err(AppError::Configuration(
                "at least one exchange must be configured under [[exchanges]]".into(),
            ));
        }
        if self.candle_intervals.is_empty() {
            return Err(AppError::Configuration("candle_intervals must not be empty".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_exchanges_is_a_configuration_error() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn loads_toml_and_applies_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            database_url = "custom.db"

            [[exchanges]]
            exchange = "Binance"
            symbols = ["BTCUSDT"]
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_url, "custom.db");
        assert_eq!(config.tick_buffer_size, 500);
        assert_eq!(config.exchanges.len(), 1);
    }
}
