//! Chime configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChimeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChimeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ChimeConfig {
    /// Load config from the default path (~/.chime/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChimeError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ChimeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ChimeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Chime home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chime")
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `~` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Per-operation timeout. Expiry counts as a transient store failure.
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_path() -> String { "~/.chime/timers.db".into() }
fn default_store_timeout() -> u64 { 10 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            timeout_secs: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scheduler loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How far ahead the loop looks for the next timer.
    #[serde(default = "default_forty_days")]
    pub horizon_days: u64,
    /// Longest single sleep before the loop re-evaluates.
    #[serde(default = "default_forty_days")]
    pub max_sleep_days: u64,
    /// Timers due within this many seconds skip the store entirely.
    #[serde(default = "default_short_timer")]
    pub short_timer_secs: u64,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Capacity of the dispatch broadcast channel.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

// Long sleeps are unreliable on some platforms past ~48 days.
fn default_forty_days() -> u64 { 40 }
fn default_short_timer() -> u64 { 60 }
fn default_backoff_initial() -> u64 { 1_000 }
fn default_backoff_max() -> u64 { 30_000 }
fn default_bus_capacity() -> usize { 256 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_forty_days(),
            max_sleep_days: default_forty_days(),
            short_timer_secs: default_short_timer(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

const SECS_PER_DAY: u64 = 86_400;

impl EngineConfig {
    /// Look-ahead window for the next timer, at least one day.
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_days.max(1).saturating_mul(SECS_PER_DAY))
    }

    /// Longest single wait, at least one day.
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_days.max(1).saturating_mul(SECS_PER_DAY))
    }

    pub fn short_timer_threshold(&self) -> Duration {
        Duration::from_secs(self.short_timer_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.max(1))
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".into() }

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}
