//! Configuration file support for pageflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PAGEFLASH_*)
//! 3. Local config file (./pageflash.toml)
//! 4. Global config file (~/.config/pageflash/config.toml)

use anyhow::Context;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = "pageflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Upload baud rate.
    pub baud: Option<u32>,
}

/// Upload protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    /// Page index of the first image page.
    pub start: Option<u8>,
    /// Crypt mode.
    pub crypt: Option<bool>,
    /// Maximum number of attempts.
    pub max_retries: Option<u32>,
    /// Upper bound on the beacon wait, in seconds.
    pub beacon_timeout_secs: Option<f64>,
}

/// Wake command configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeSection {
    /// Send the wake command before each attempt.
    pub enabled: Option<bool>,
    /// Device address.
    pub address: Option<u8>,
    /// Wake baud rate.
    pub baud: Option<u32>,
    /// Register to write.
    pub register: Option<u16>,
    /// Value to write.
    pub value: Option<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadSection,
    /// Wake configuration.
    #[serde(default)]
    pub wake: WakeSection,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Missing files are skipped; unreadable or malformed ones are reported
    /// and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_optional(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if let Some(local_config) = Self::load_optional(local_path) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load a file if it exists, warning about anything unusable.
    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pageflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Connection
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        // Upload
        if other.upload.start.is_some() {
            self.upload.start = other.upload.start;
        }
        if other.upload.crypt.is_some() {
            self.upload.crypt = other.upload.crypt;
        }
        if other.upload.max_retries.is_some() {
            self.upload.max_retries = other.upload.max_retries;
        }
        if other.upload.beacon_timeout_secs.is_some() {
            self.upload.beacon_timeout_secs = other.upload.beacon_timeout_secs;
        }

        // Wake
        if other.wake.enabled.is_some() {
            self.wake.enabled = other.wake.enabled;
        }
        if other.wake.address.is_some() {
            self.wake.address = other.wake.address;
        }
        if other.wake.baud.is_some() {
            self.wake.baud = other.wake.baud;
        }
        if other.wake.register.is_some() {
            self.wake.register = other.wake.register;
        }
        if other.wake.value.is_some() {
            self.wake.value = other.wake.value;
        }
    }
}
