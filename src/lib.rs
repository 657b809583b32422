//! rataddon
//!
//! Addon lifecycle manager: discovers Lua addons in a directory, loads and
//! constructs them, starts and stops them, and forwards host events to every
//! running addon while containing any fault raised by addon code.
//!
//! # Architecture
//!
//! - **Addon Module**: registry, loader, lifecycle controller, event
//!   broadcaster and the manager façade
//! - **Config Module**: `~/.rataddonrc` parsing
//! - **Logging Module**: file logging through `tracing`
//!
//! # Usage
//!
//! ```no_run
//! use rataddon::{AddonManager, Config};
//!
//! let config = Config::load()?;
//! let mut manager = AddonManager::from_config(&config);
//! manager.discover_and_load_all()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod addon;
pub mod config;
pub mod logging;

// Re-export main types
pub use addon::{AddonError, AddonManager, AddonRecord, LifecycleError, ManagerSettings};
pub use config::Config;
