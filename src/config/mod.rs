//! Configuration module for rataddon.
//!
//! Handles loading and parsing the .rataddonrc configuration file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::addon::{LUA_EXTENSION, addon_directory};
use crate::logging::LogConfig;

/// Default .rataddonrc file content with all settings documented.
const DEFAULT_RATADDONRC: &str = r#"# rataddon Configuration File
# ============================
# This file is read on startup.
# Lines starting with '#' are comments.
#
# Addons
# ------
# Directory scanned for addon files (default: ~/.rataddon/addons)
# addon_dir = ~/.rataddon/addons

# File suffix identifying addon files
# addon_extension = .addon.lua

# Start addons that were enabled last time (true/false)
# autostart = true

# Logging
# -------
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
# addon_log_level = debug  # Level for addon lifecycle and host.log output

# Addon state
# -----------
# Written by rataddon when an addon is enabled or disabled:
# addon.<id> = enabled | disabled
"#;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be created or read.
    #[error("Config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to config file.
    pub config_path: PathBuf,
    /// Directory scanned for addons.
    pub addon_dir: PathBuf,
    /// Addon file suffix.
    pub addon_extension: String,
    /// Start persisted-enabled addons on discovery.
    pub autostart: bool,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            addon_dir: addon_directory(),
            addon_extension: LUA_EXTENSION.to_string(),
            autostart: true,
            log_config: LogConfig::default(),
        }
    }
}

impl Config {
    /// Returns the default config file path (~/.rataddonrc).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rataddonrc")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_config_path();
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if !path.exists() {
            Self::create_default_config(path).map_err(io_err)?;
        }

        let content = fs::read_to_string(path).map_err(io_err)?;
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };
        config.parse(&content);
        Ok(config)
    }

    /// Creates the default config file.
    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_RATADDONRC.as_bytes())?;
        Ok(())
    }

    /// Parses the config file content.
    fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();

                self.apply_setting(key, value);
            }
        }
    }

    /// Applies a single setting.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "addon_dir" | "addon-dir" => {
                if !value.is_empty() {
                    self.addon_dir = expand_home(value);
                }
            }
            "addon_extension" => {
                if !value.is_empty() {
                    let ext = if value.starts_with('.') {
                        value.to_string()
                    } else {
                        format!(".{}", value)
                    };
                    self.addon_extension = ext;
                }
            }
            "autostart" => {
                self.autostart = parse_bool(value);
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "addon_log_level" => {
                self.log_config.addon_level = Some(LogConfig::parse_level(value));
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled = parse_bool(value);
            }
            // addon.<id> entries belong to AddonStorage
            _ => {}
        }
    }

}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
}

/// Expands a leading `~/` to the home directory.
fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(value),
    }
}
