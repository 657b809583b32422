//! File logging for rataddon.
//!
//! One log file per run under ~/.rataddon/logs/. Addon faults are logged by
//! the manager with `addon` and `operation` fields; messages addons write
//! through `host.log` use the [`SCRIPT_TARGET`] target so both can be
//! filtered apart from the manager's own output.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Target of messages addons log through `host.log`.
pub const SCRIPT_TARGET: &str = "addon_script";

/// Target of the manager's addon modules.
const MANAGER_TARGET: &str = "rataddon::addon";

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Log file name prefix.
const LOG_PREFIX: &str = "rataddon_";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level for everything without a more specific setting.
    pub level: LevelFilter,
    /// Level for addon lifecycle and addon script output, if different.
    pub addon_level: Option<LevelFilter>,
    /// Hours a log file is kept.
    pub retention_hours: u32,
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            addon_level: None,
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Parses a level name. Unknown names fall back to `info`.
    #[must_use]
    pub fn parse_level(value: &str) -> LevelFilter {
        match value.trim().to_lowercase().as_str() {
            "warning" => LevelFilter::WARN,
            "none" | "disabled" => LevelFilter::OFF,
            other => other.parse().unwrap_or(LevelFilter::INFO),
        }
    }

    /// Parses retention hours. Invalid values fall back to the default.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.trim().parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }

    /// `EnvFilter` directives for this config.
    #[must_use]
    pub fn directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        match self.addon_level {
            Some(addon) => {
                let addon = addon.to_string().to_lowercase();
                format!(
                    "{},{}={},{}={}",
                    level, MANAGER_TARGET, addon, SCRIPT_TARGET, addon
                )
            }
            None => level,
        }
    }

    fn is_active(&self) -> bool {
        self.enabled
            && (self.level != LevelFilter::OFF
                || self.addon_level.is_some_and(|l| l != LevelFilter::OFF))
    }
}

/// Returns the log directory path (~/.rataddon/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    crate::addon::base_directory().join("logs")
}

/// Path of a new log file in `dir`, named after the current time.
#[must_use]
pub fn log_file_path(dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    dir.join(format!("{}{}.log", LOG_PREFIX, now.format("%Y-%m-%d_%H-%M-%S")))
}

/// Deletes rataddon log files in `dir` older than `retention_hours`.
///
/// Returns the deleted paths. Files not named like our logs are left alone.
pub fn prune_logs(dir: &Path, retention_hours: u32) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let max_age = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = Vec::new();

    for entry in fs::read_dir(dir)?.filter_map(Result::ok) {
        let path = entry.path();
        if !is_log_file(&path) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_file(&path).is_ok() {
            deleted.push(path);
        }
    }

    Ok(deleted)
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
}

/// Installs the file logger in the default log directory.
pub fn init(config: &LogConfig) -> io::Result<Option<PathBuf>> {
    init_in(config, &log_directory())
}

/// Installs the file logger writing into `dir`.
///
/// Returns the log file path, or `None` when logging is turned off.
/// `RUST_LOG` overrides the configured levels.
pub fn init_in(config: &LogConfig, dir: &Path) -> io::Result<Option<PathBuf>> {
    if !config.is_active() {
        return Ok(None);
    }

    fs::create_dir_all(dir)?;
    let pruned = prune_logs(dir, config.retention_hours)?;

    let log_path = log_file_path(dir);
    let log_file = File::create(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        filter = %config.directives(),
        "rataddon logging to {}",
        log_path.display()
    );
    if !pruned.is_empty() {
        tracing::info!("Removed {} expired log file(s)", pruned.len());
    }

    Ok(Some(log_path))
}
