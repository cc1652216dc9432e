// Configuration module for the confirmation race

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::constants::{
    CANONICAL_POLL_INTERVAL, CANONICAL_WAIT_TIMEOUT, EXPECTED_FAST_MS, EXPECTED_SLOW_MS,
    FAST_EXCLUSION_TIMEOUT, FAST_POLL_ATTEMPTS, FAST_POLL_INTERVAL,
};
use crate::core::interpolator::Interpolator;

use super::watchers::WatcherTimings;

// =============================================================================
// CONFIGURATION STRUCTURES
// =============================================================================

/// Chain endpoints (Base Sepolia by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Regular JSON-RPC endpoint (canonical receipts)
    #[serde(default = "default_regular_rpc")]
    pub regular_rpc: String,
    /// Preconfirmation JSON-RPC endpoint (fast receipt polling)
    #[serde(default = "default_flashblock_rpc")]
    pub flashblock_rpc: String,
    /// Flashblocks stream
    #[serde(default = "default_flashblock_ws")]
    pub flashblock_ws: String,
    /// Regular WebSocket endpoint, only used for the newHeads cadence monitor
    #[serde(default = "default_regular_ws")]
    pub regular_ws: String,
}

fn default_regular_rpc() -> String {
    "https://sepolia.base.org".to_string()
}
fn default_flashblock_rpc() -> String {
    "https://sepolia-preconf.base.org".to_string()
}
fn default_flashblock_ws() -> String {
    "wss://sepolia.flashblocks.base.org/ws".to_string()
}
fn default_regular_ws() -> String {
    "wss://base-sepolia-rpc.publicnode.com".to_string()
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            regular_rpc: default_regular_rpc(),
            flashblock_rpc: default_flashblock_rpc(),
            flashblock_ws: default_flashblock_ws(),
            regular_ws: default_regular_ws(),
        }
    }
}

/// Watcher budgets and expected cadences, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_fast_exclusion_timeout_ms")]
    pub fast_exclusion_timeout_ms: u64,
    #[serde(default = "default_fast_poll_interval_ms")]
    pub fast_poll_interval_ms: u64,
    #[serde(default = "default_fast_poll_attempts")]
    pub fast_poll_attempts: u32,
    #[serde(default = "default_canonical_wait_timeout_ms")]
    pub canonical_wait_timeout_ms: u64,
    #[serde(default = "default_canonical_poll_interval_ms")]
    pub canonical_poll_interval_ms: u64,
    #[serde(default = "default_expected_fast_ms")]
    pub expected_fast_ms: f64,
    #[serde(default = "default_expected_slow_ms")]
    pub expected_slow_ms: f64,
}

fn default_fast_exclusion_timeout_ms() -> u64 {
    FAST_EXCLUSION_TIMEOUT.as_millis() as u64
}
fn default_fast_poll_interval_ms() -> u64 {
    FAST_POLL_INTERVAL.as_millis() as u64
}
fn default_fast_poll_attempts() -> u32 {
    FAST_POLL_ATTEMPTS
}
fn default_canonical_wait_timeout_ms() -> u64 {
    CANONICAL_WAIT_TIMEOUT.as_millis() as u64
}
fn default_canonical_poll_interval_ms() -> u64 {
    CANONICAL_POLL_INTERVAL.as_millis() as u64
}
fn default_expected_fast_ms() -> f64 {
    EXPECTED_FAST_MS
}
fn default_expected_slow_ms() -> f64 {
    EXPECTED_SLOW_MS
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            fast_exclusion_timeout_ms: default_fast_exclusion_timeout_ms(),
            fast_poll_interval_ms: default_fast_poll_interval_ms(),
            fast_poll_attempts: default_fast_poll_attempts(),
            canonical_wait_timeout_ms: default_canonical_wait_timeout_ms(),
            canonical_poll_interval_ms: default_canonical_poll_interval_ms(),
            expected_fast_ms: default_expected_fast_ms(),
            expected_slow_ms: default_expected_slow_ms(),
        }
    }
}

impl TimingSettings {
    pub fn watcher_timings(&self) -> WatcherTimings {
        WatcherTimings {
            fast_exclusion_timeout: Duration::from_millis(self.fast_exclusion_timeout_ms),
            fast_poll_interval: Duration::from_millis(self.fast_poll_interval_ms),
            fast_poll_attempts: self.fast_poll_attempts,
            canonical_wait_timeout: Duration::from_millis(self.canonical_wait_timeout_ms),
        }
    }

    pub fn canonical_poll_interval(&self) -> Duration {
        Duration::from_millis(self.canonical_poll_interval_ms)
    }

    pub fn interpolator(&self) -> Interpolator {
        Interpolator::new(self.expected_fast_ms, self.expected_slow_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    /// Mirror logs to stdout
    #[serde(default)]
    pub console: bool,
    /// Log file path (relative to the config file or absolute). Empty = no file logging.
    #[serde(default)]
    pub log_file: String,
}

impl LoggingSettings {
    /// Resolve the log file against `base_dir`; `None` when file logging is off
    pub fn log_file_path(&self, base_dir: &Path) -> Option<PathBuf> {
        if self.log_file.trim().is_empty() {
            return None;
        }
        let path = PathBuf::from(&self.log_file);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(base_dir.join(path))
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

// =============================================================================
// CONFIG LOADING
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

impl Config {
    pub const CONFIG_FILENAME: &'static str = "flashblock_race.toml";

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "[config] Looking for config");

        if !path.exists() {
            debug!("[config] No config found, using defaults");
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "[config] Loaded config");
        Ok(config)
    }

    /// Load `flashblock_race.toml` from a directory
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(Self::CONFIG_FILENAME))
    }
}
