//! Addon lifecycle management.
//!
//! Discovers addon files in a directory, loads them through a
//! [`ModuleLoader`], drives the start/stop state machine, and forwards host
//! events to every started addon. Faults raised by addon code are caught at
//! each call and reported as [`AddonError`] values.
//!
//! # Example
//!
//! ```no_run
//! use rataddon::addon::{AddonManager, ManagerSettings};
//!
//! let mut manager = AddonManager::with_lua(ManagerSettings::new("/tmp/addons"));
//! let errors = manager.discover_and_load_all()?;
//! for err in errors {
//!     eprintln!("{}", err);
//! }
//! manager.enable("foo").ok();
//! manager.on_switch();
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod aggregator;
pub mod broadcast;
pub mod error;
pub mod events;
pub mod hook;
pub mod lifecycle;
pub mod loader;
pub mod lua;
pub mod lua_api;
pub mod manager;
pub mod record;
pub mod registry;
pub mod source;
pub mod storage;

use std::path::PathBuf;

pub use aggregator::{Batch, ErrorAggregator};
pub use broadcast::{BroadcastReport, EventBroadcaster, HostEvent, MutationRecord};
pub use error::{AddonError, AddonErrorKind, CompileError, Fault, LifecycleError};
pub use events::{EventEmitter, ManagerEvent, ToastLevel};
pub use hook::{Capabilities, Hook};
pub use lifecycle::AddonLifecycleController;
pub use loader::AddonLoader;
pub use lua::{LUA_EXTENSION, LuaInstance, LuaLoader};
pub use lua_api::{HostHandle, HostNotification, HostRequest};
pub use manager::{AddonManager, ManagerSettings};
pub use record::{AddonRecord, AddonState, AddonSummary};
pub use registry::{AddonRef, AddonRegistry};
pub use source::{AddonFactory, AddonInstance, AddonMetadata, CompiledModule, ModuleLoader};
pub use storage::{AddonStorage, StorageError};

/// Returns the base data directory (~/.rataddon/).
#[must_use]
pub fn base_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rataddon")
}

/// Returns the default addon directory (~/.rataddon/addons/).
#[must_use]
pub fn addon_directory() -> PathBuf {
    base_directory().join("addons")
}
