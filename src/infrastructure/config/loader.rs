use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project configuration and the default database.
pub const CONFIG_DIR: &str = ".tickrewards";

/// Prefix for environment overrides, e.g. `TICKREWARDS_SYNC__POLL_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "TICKREWARDS_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid poll_interval_secs: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid max_backoff_factor: {0}. Must be at least 1")]
    InvalidBackoffFactor(u32),

    #[error("Invalid classifier_concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid request_timeout_secs: {0}. Must be at least 1")]
    InvalidRequestTimeout(u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .tickrewards/config.yaml
    /// 3. .tickrewards/local.yaml (optional overrides)
    /// 4. Environment variables (TICKREWARDS_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`load`](Self::load), rooted at `dir` instead of the cwd.
    pub fn load_from_dir(dir: &Path) -> Result<Config> {
        let config_dir = dir.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_dir.join("config.yaml")))
            .merge(Yaml::file(config_dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        let sync = &config.sync;
        if sync.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval(sync.poll_interval_secs));
        }
        if sync.max_backoff_factor == 0 {
            return Err(ConfigError::InvalidBackoffFactor(sync.max_backoff_factor));
        }
        if sync.classifier_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(sync.classifier_concurrency));
        }
        if sync.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidRequestTimeout(sync.request_timeout_secs));
        }
        if sync.rollover_min_delta_secs < 0 || sync.cursor_guard_ms < 0 || sync.initial_lookback_days < 0 {
            return Err(ConfigError::ValidationFailed(
                "sync durations cannot be negative".to_string(),
            ));
        }
        if sync.recent_buffer_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "recent_buffer_size must be at least 1".to_string(),
            ));
        }

        if config.ticktick.api_base.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "ticktick.api_base cannot be empty".to_string(),
            ));
        }
        if config.ticktick.requests_per_minute == 0 {
            return Err(ConfigError::ValidationFailed(
                "ticktick.requests_per_minute must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
