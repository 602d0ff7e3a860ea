use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for tickrewards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reconciliation and polling configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Remote task service configuration
    #[serde(default)]
    pub ticktick: TickTickConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".tickrewards/tickrewards.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL for the configured path.
    pub fn url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite:{}", self.path)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (console only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Reconciliation and polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Seconds between ticks when healthy
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound of the failure backoff multiplier
    #[serde(default = "default_max_backoff_factor")]
    pub max_backoff_factor: u32,

    /// Concurrent remote lookups while classifying disappearances
    #[serde(default = "default_classifier_concurrency")]
    pub classifier_concurrency: usize,

    /// Timeout for each remote call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum due-date advance that counts as a rollover
    #[serde(default = "default_rollover_min_delta_secs")]
    pub rollover_min_delta_secs: i64,

    /// Added to the cursor on every advance
    #[serde(default = "default_cursor_guard_ms")]
    pub cursor_guard_ms: i64,

    /// Query completion history when a direct lookup is inconclusive
    #[serde(default = "default_true")]
    pub evidence_window_fallback: bool,

    /// Evidence window start when no cursor has been stored yet
    #[serde(default = "default_initial_lookback_days")]
    pub initial_lookback_days: i64,

    /// Revoke a completion whose task shows up as open again
    #[serde(default = "default_true")]
    pub revoke_on_reappearance: bool,

    /// Size of the recent completions ring buffer
    #[serde(default = "default_recent_buffer_size")]
    pub recent_buffer_size: usize,
}

const fn default_poll_interval_secs() -> u64 {
    180
}

const fn default_max_backoff_factor() -> u32 {
    5
}

const fn default_classifier_concurrency() -> usize {
    4
}

const fn default_request_timeout_secs() -> u64 {
    20
}

const fn default_rollover_min_delta_secs() -> i64 {
    60
}

const fn default_cursor_guard_ms() -> i64 {
    1000
}

const fn default_true() -> bool {
    true
}

const fn default_initial_lookback_days() -> i64 {
    7
}

const fn default_recent_buffer_size() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_backoff_factor: default_max_backoff_factor(),
            classifier_concurrency: default_classifier_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            rollover_min_delta_secs: default_rollover_min_delta_secs(),
            cursor_guard_ms: default_cursor_guard_ms(),
            evidence_window_fallback: default_true(),
            initial_lookback_days: default_initial_lookback_days(),
            revoke_on_reappearance: default_true(),
            recent_buffer_size: default_recent_buffer_size(),
        }
    }
}

/// TickTick Open API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TickTickConfig {
    /// Base URL of the Open API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bearer token; falls back to `TICKTICK_ACCESS_TOKEN`
    #[serde(default)]
    pub access_token: Option<String>,

    /// Requests allowed per rate-limit window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_api_base() -> String {
    "https://api.ticktick.com/open/v1".to_string()
}

const fn default_requests_per_minute() -> u32 {
    100
}

impl Default for TickTickConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            access_token: None,
            requests_per_minute: default_requests_per_minute(),
        }
    }
}
