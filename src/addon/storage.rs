//! Enabled-state persistence in the config file.
//!
//! Each addon is one `addon.<id> = enabled|disabled` line; other lines are
//! preserved untouched.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Prefix of per-addon keys.
const KEY_PREFIX: &str = "addon.";

/// Maximum lines read from the config file.
const MAX_LINES: usize = 1000;

/// Maximum addons tracked.
const MAX_TRACKED_ADDONS: usize = 500;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The config file could not be read or written.
    #[error("Config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Addon ids must be non-empty and contain no whitespace or `=`.
    #[error("Invalid addon id: {0:?}")]
    InvalidId(String),
}

/// Reads and writes the enabled-state map.
#[derive(Debug, Clone)]
pub struct AddonStorage {
    config_path: PathBuf,
}

impl AddonStorage {
    /// Creates storage backed by `config_path`.
    #[must_use]
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Loads the persisted map. A missing file yields an empty map.
    pub fn load_states(&self) -> HashMap<String, bool> {
        let mut states = HashMap::new();

        let Ok(file) = fs::File::open(&self.config_path) else {
            return states;
        };

        for line in BufReader::new(file).lines().take(MAX_LINES) {
            let Ok(line) = line else {
                continue;
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Some(id) = key.trim().strip_prefix(KEY_PREFIX) else {
                continue;
            };
            if id.is_empty() || states.len() >= MAX_TRACKED_ADDONS {
                continue;
            }

            let value = value.split('#').next().unwrap_or("").trim();
            match parse_state(value) {
                Some(enabled) => {
                    states.insert(id.to_string(), enabled);
                }
                None => tracing::warn!(addon = %id, "Ignoring addon state {:?}", value),
            }
        }

        states
    }

    /// Persists one entry.
    pub fn save_state(&self, id: &str, enabled: bool) -> Result<(), StorageError> {
        validate_id(id)?;
        let value = if enabled { "enabled" } else { "disabled" };
        self.update_setting(&format!("{}{}", KEY_PREFIX, id), value)
    }

    /// Deletes one entry.
    pub fn remove_state(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        self.remove_setting(&format!("{}{}", KEY_PREFIX, id))
    }

    /// Writes the whole map: changed entries are updated, entries missing
    /// from `states` are removed.
    ///
    /// Every entry is attempted; the first failure is returned afterwards.
    pub fn save_all(&self, states: &HashMap<String, bool>) -> Result<(), StorageError> {
        let persisted = self.load_states();
        let mut first_error = None;
        let mut keep = |result: Result<(), StorageError>| {
            if let Err(e) = result {
                tracing::warn!("Skipping addon state entry: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        for id in persisted.keys().filter(|id| !states.contains_key(*id)) {
            keep(self.remove_state(id));
        }
        let mut ids: Vec<_> = states.keys().collect();
        ids.sort();
        for id in ids {
            let enabled = states[id];
            if persisted.get(id) != Some(&enabled) {
                keep(self.save_state(id, enabled));
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Sets `key = value`, replacing an existing line or appending.
    fn update_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let content = fs::read_to_string(&self.config_path).unwrap_or_default();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();

        let mut found = false;
        for line in lines.iter_mut() {
            if line_has_key(line, key) {
                *line = format!("{} = {}", key, value);
                found = true;
                break;
            }
        }
        if !found {
            lines.push(format!("{} = {}", key, value));
        }

        self.write_lines(&lines)
    }

    /// Drops every `key = ...` line.
    fn remove_setting(&self, key: &str) -> Result<(), StorageError> {
        let content = fs::read_to_string(&self.config_path).unwrap_or_default();
        let lines: Vec<&str> = content
            .lines()
            .filter(|line| !line_has_key(line, key))
            .collect();
        self.write_lines(&lines)
    }

    fn write_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.config_path.clone(),
            source,
        };

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut file = fs::File::create(&self.config_path).map_err(io_err)?;
        for line in lines {
            writeln!(file, "{}", line.as_ref()).map_err(io_err)?;
        }
        Ok(())
    }
}

fn line_has_key(line: &str, key: &str) -> bool {
    line.trim()
        .split_once('=')
        .is_some_and(|(k, _)| k.trim() == key)
}

fn parse_state(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "enabled" | "true" | "on" => Some(true),
        "disabled" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Whether `id` can be written as an `addon.<id>` key.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('=') && !id.contains('#') && !id.contains(char::is_whitespace)
}

fn validate_id(id: &str) -> Result<(), StorageError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}
