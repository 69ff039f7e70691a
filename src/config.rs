//! Persisted daemon settings.
//!
//! Cross-platform: uses the appropriate config directory for each OS.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::directory::DISCOVERY_INTERVAL_MS;
use crate::error::{LinkError, Result};

// =============================================================================
// Config Path
// =============================================================================

const APP_NAME: &str = "corsair-link";
const CONFIG_FILE: &str = "config.json";

/// Get the configuration directory path.
/// - Linux: ~/.config/corsair-link/
/// - Windows: %APPDATA%\corsair-link\
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .ok_or_else(|| LinkError::InvalidInput("Could not find config directory".into()))
}

/// Get the full path to the config file.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

// =============================================================================
// Settings
// =============================================================================

/// Daemon cadence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pause between sensor refresh passes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause between discovery scans, in milliseconds.
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    /// Pause between successive hub open attempts, in milliseconds.
    #[serde(default = "default_open_throttle_ms")]
    pub open_throttle_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_discovery_interval_ms() -> u64 {
    DISCOVERY_INTERVAL_MS
}

fn default_open_throttle_ms() -> u64 {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            discovery_interval_ms: default_discovery_interval_ms(),
            open_throttle_ms: default_open_throttle_ms(),
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn open_throttle(&self) -> Duration {
        Duration::from_millis(self.open_throttle_ms)
    }
}

// =============================================================================
// Storage Functions
// =============================================================================

/// Load configuration from the default location, falling back to defaults
/// when no file exists yet.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Save configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let dir = get_config_dir()?;
    std::fs::create_dir_all(&dir)?;
    save_config_to(&dir.join(CONFIG_FILE), config)
}

/// Save configuration to an explicit path.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
