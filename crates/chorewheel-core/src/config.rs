//! TOML-based engine configuration.
//!
//! Stores tuning knobs for the lifecycle engine:
//! - Periodic scan interval
//! - Snapshot retention window
//! - Early-completion grace window for streak crediting
//! - Persistence retry policy
//!
//! Configuration is stored at `~/.config/chorewheel/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::storage::{data_dir, RetryPolicy};

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/chorewheel/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between periodic scan ticks.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Days of daily snapshot buckets to retain.
    #[serde(default = "default_retention_days")]
    pub snapshot_retention_days: u32,
    /// Early-completion grace window in minutes. A completion at most this
    /// far before a scheduled occurrence is credited to that occurrence;
    /// zero ignores early completions.
    #[serde(default)]
    pub early_completion_grace_minutes: i64,
    #[serde(default)]
    pub persistence: RetryPolicy,
}

fn default_scan_interval_secs() -> u64 {
    300
}
fn default_retention_days() -> u32 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            snapshot_retention_days: default_retention_days(),
            early_completion_grace_minutes: 0,
            persistence: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    fn config_path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/chorewheel"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults when the file does
    /// not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(path)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, raw).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }
}
