//! Addon manager.
//!
//! Owns the registry, loader, event emitter and error aggregator, and exposes
//! the operations the host calls. Lifecycle requests queued by addon code
//! through the Lua `host` table are applied after each operation returns.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use super::aggregator::{Batch, ErrorAggregator};
use super::broadcast::{BroadcastReport, EventBroadcaster, HostEvent, MutationRecord};
use super::error::{AddonError, LifecycleError};
use super::events::{EventEmitter, ManagerEvent, ToastLevel};
use super::lifecycle::AddonLifecycleController;
use super::loader::AddonLoader;
use super::lua::{LUA_EXTENSION, LuaLoader};
use super::lua_api::{self, HostHandle, HostRequest};
use super::record::{AddonRecord, AddonSummary};
use super::registry::{AddonRef, AddonRegistry};
use super::source::ModuleLoader;
use super::storage::AddonStorage;
use crate::config::Config;

/// Maximum rounds of addon-queued requests applied after one operation.
const MAX_DEFERRED_ROUNDS: usize = 16;

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Directory scanned for addon files.
    pub addon_dir: PathBuf,
    /// Addon file suffix.
    pub extension: String,
    /// Start addons persisted as enabled when they are loaded.
    pub autostart: bool,
}

impl ManagerSettings {
    /// Settings for `addon_dir` with defaults.
    #[must_use]
    pub fn new(addon_dir: impl Into<PathBuf>) -> Self {
        Self {
            addon_dir: addon_dir.into(),
            extension: LUA_EXTENSION.to_string(),
            autostart: true,
        }
    }

    /// Settings taken from the config file.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            addon_dir: config.addon_dir.clone(),
            extension: config.addon_extension.clone(),
            autostart: config.autostart,
        }
    }
}

/// Addon manager.
pub struct AddonManager {
    registry: AddonRegistry,
    loader: AddonLoader,
    events: EventEmitter,
    errors: ErrorAggregator,
    host: HostHandle,
    storage: Option<AddonStorage>,
    autostart: bool,
}

impl AddonManager {
    /// Creates a manager with a custom module loader.
    ///
    /// `host` must be the handle the module loader hands to addon code.
    #[must_use]
    pub fn new(settings: ManagerSettings, modules: Box<dyn ModuleLoader>, host: HostHandle) -> Self {
        let mut registry = AddonRegistry::new();
        registry.init(Default::default());

        Self {
            registry,
            loader: AddonLoader::new(modules, settings.addon_dir),
            events: EventEmitter::new(),
            errors: ErrorAggregator::new(),
            host,
            storage: None,
            autostart: settings.autostart,
        }
    }

    /// Creates a manager loading Lua addons.
    #[must_use]
    pub fn with_lua(settings: ManagerSettings) -> Self {
        let host = lua_api::new_handle();
        let modules = LuaLoader::with_extension(&settings.extension, host.clone());
        Self::new(settings, Box::new(modules), host)
    }

    /// Creates a Lua manager from the config file, persisting enabled state
    /// back into it.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::with_lua(ManagerSettings::from_config(config))
            .with_storage(AddonStorage::new(config.config_path.clone()))
    }

    /// Persists enabled state through `storage`, seeding the registry from it.
    #[must_use]
    pub fn with_storage(mut self, storage: AddonStorage) -> Self {
        self.registry.init(storage.load_states());
        self.storage = Some(storage);
        self
    }

    /// Directory scanned for addons.
    #[must_use]
    pub fn addon_dir(&self) -> &Path {
        self.loader.dir()
    }

    /// Shared host state given to addon code.
    #[must_use]
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Loads every addon file in the directory, then starts those persisted
    /// as enabled. A failing addon never stops the others.
    ///
    /// Returns the errors of this pass.
    pub fn discover_and_load_all(&mut self) -> io::Result<&[AddonError]> {
        self.errors.begin(Batch::Startup);
        if !self.registry.is_initialized() {
            let states = self
                .storage
                .as_ref()
                .map(AddonStorage::load_states)
                .unwrap_or_default();
            self.registry.init(states);
        }

        let files = self.loader.discover()?;
        tracing::info!(
            dir = %self.loader.dir().display(),
            "Discovered {} addon file(s)",
            files.len()
        );

        let mut loaded = Vec::new();
        for file in &files {
            if let Some(id) = self.load_one(file, &Batch::Startup) {
                loaded.push(id);
            }
        }
        if self.autostart {
            self.start_enabled(&loaded, &Batch::Startup);
        }

        self.drain_host();
        self.persist();
        Ok(self.errors.get(&Batch::Startup))
    }

    /// Loads a single file, starting it if persisted as enabled.
    pub fn load(&mut self, filename: impl AsRef<Path>) -> Result<String, AddonError> {
        self.errors.begin(Batch::Manual);
        let path = self.loader.resolve_path(filename.as_ref());
        let existed = self.registry.by_filename(&path).is_some();

        let result = self.loader.load(&mut self.registry, &path);
        if !existed {
            if let Some(id) = self.registry.by_filename(&path).map(|r| r.id.clone()) {
                self.events.emit(ManagerEvent::Loaded { id: id.clone() });
                if result.is_ok() && self.autostart {
                    self.start_enabled(&[id], &Batch::Manual);
                }
            }
        }
        if let Err(err) = &result {
            self.errors.record(&Batch::Manual, err.clone());
        }

        self.drain_host();
        self.persist();
        result
    }

    /// Starts an addon.
    pub fn enable<'t>(&mut self, target: impl Into<AddonRef<'t>>) -> Result<(), LifecycleError> {
        let id = self.resolve(target.into())?;
        self.errors.begin(Batch::Manual);
        let result = self.lifecycle().enable(&id);
        self.finish(&Batch::Manual, result)
    }

    /// Stops an addon.
    pub fn disable<'t>(&mut self, target: impl Into<AddonRef<'t>>) -> Result<(), LifecycleError> {
        let id = self.resolve(target.into())?;
        self.errors.begin(Batch::Manual);
        let result = self.lifecycle().disable(&id);
        self.finish(&Batch::Manual, result)
    }

    /// Enables or disables depending on the current enabled flag.
    pub fn toggle<'t>(&mut self, target: impl Into<AddonRef<'t>>) -> Result<(), LifecycleError> {
        let id = self.resolve(target.into())?;
        self.errors.begin(Batch::Manual);
        let result = self.lifecycle().toggle(&id);
        self.finish(&Batch::Manual, result)
    }

    /// Rebuilds an addon from its file.
    ///
    /// The old instance is stopped and dropped before the new one is
    /// constructed. The new instance is started if the addon is still
    /// enabled afterwards.
    pub fn reload<'t>(&mut self, target: impl Into<AddonRef<'t>>) -> Result<(), LifecycleError> {
        let id = self.resolve(target.into())?;
        let path = self
            .registry
            .get(&id)
            .map(|r| r.filename.clone())
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
        let batch = Batch::Reload(id.clone());
        self.errors.begin(batch.clone());

        let mut first_error = None;
        if let Err(err) = self.lifecycle().suspend(&id) {
            self.note(&batch, &err);
            first_error = Some(err);
        }

        match self.loader.rebuild(&mut self.registry, &id, &path) {
            Ok(()) => {
                tracing::info!(addon = %id, "Reloaded addon");
                self.events.emit(ManagerEvent::Reloaded { id: id.clone() });
                if self.registry.is_enabled(&id) {
                    if let Err(err) = self.lifecycle().enable(&id) {
                        self.note(&batch, &err);
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            Err(err) => {
                if !self.registry.contains(&id) {
                    self.events.emit(ManagerEvent::Unloaded { id: id.clone() });
                } else {
                    self.events.emit(ManagerEvent::Reloaded { id: id.clone() });
                }
                self.errors.record(&batch, err.clone());
                if first_error.is_none() {
                    first_error = Some(LifecycleError::Addon(err));
                }
            }
        }

        self.drain_host();
        self.persist();
        first_error.map_or(Ok(()), Err)
    }

    /// Stops and removes an addon, deleting its enabled entry.
    pub fn unload<'t>(&mut self, target: impl Into<AddonRef<'t>>) -> Result<(), LifecycleError> {
        let id = self.resolve(target.into())?;
        self.errors.begin(Batch::Manual);
        let result = self.lifecycle().unload(&id);
        self.finish(&Batch::Manual, result)
    }

    /// Rescans the directory: loads new files and unloads records whose file
    /// is gone.
    pub fn refresh(&mut self) -> io::Result<&[AddonError]> {
        self.errors.begin(Batch::Refresh);
        let files = self.loader.discover()?;
        let present: HashSet<&PathBuf> = files.iter().collect();

        let vanished: Vec<String> = self
            .registry
            .records()
            .iter()
            .filter(|r| !present.contains(&r.filename) && !r.filename.exists())
            .map(|r| r.id.clone())
            .collect();
        for id in vanished {
            let result = self.lifecycle().unload(&id);
            if let Err(err) = result {
                self.note(&Batch::Refresh, &err);
            }
        }

        let added: Vec<PathBuf> = files
            .into_iter()
            .filter(|f| self.registry.by_filename(f).is_none())
            .collect();
        let mut loaded = Vec::new();
        for file in &added {
            if let Some(id) = self.load_one(file, &Batch::Refresh) {
                loaded.push(id);
            }
        }
        if self.autostart {
            self.start_enabled(&loaded, &Batch::Refresh);
        }

        self.drain_host();
        self.persist();
        Ok(self.errors.get(&Batch::Refresh))
    }

    /// Records in registry order.
    #[must_use]
    pub fn list(&self) -> &[AddonRecord] {
        self.registry.records()
    }

    /// Record by id or filename.
    #[must_use]
    pub fn get<'t>(&self, target: impl Into<AddonRef<'t>>) -> Option<&AddonRecord> {
        let id = self.registry.resolve(target.into())?;
        self.registry.get(&id)
    }

    /// Enabled flag for an id.
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        self.registry.is_enabled(id)
    }

    /// Plain-data snapshot of every record.
    #[must_use]
    pub fn summaries(&self) -> Vec<AddonSummary> {
        self.registry
            .records()
            .iter()
            .map(|r| r.summary(self.registry.is_enabled(&r.id)))
            .collect()
    }

    /// Subscribes to manager events.
    pub fn subscribe(&mut self) -> Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Errors collected so far, by batch.
    #[must_use]
    pub fn errors(&self) -> &ErrorAggregator {
        &self.errors
    }

    /// Mutable error aggregator, for consumers that clear what they showed.
    pub fn errors_mut(&mut self) -> &mut ErrorAggregator {
        &mut self.errors
    }

    /// Delivers a host event to every started addon.
    pub fn broadcast(&mut self, event: &HostEvent) -> BroadcastReport {
        let report = EventBroadcaster::new(&mut self.registry).broadcast(event);
        self.drain_host();
        self.persist();
        report
    }

    /// Host navigated to another page.
    pub fn on_switch(&mut self) -> BroadcastReport {
        self.events.emit(ManagerEvent::PageSwitch);
        self.broadcast(&HostEvent::PageSwitch)
    }

    /// Host observed a batch of mutations; each record is delivered in turn.
    pub fn on_mutations(&mut self, batch: &[MutationRecord]) -> BroadcastReport {
        let report = EventBroadcaster::new(&mut self.registry).broadcast_mutations(batch);
        self.drain_host();
        self.persist();
        report
    }

    /// Stops every started addon and drops all records. Enabled state is
    /// persisted as it was, so the next startup restores it.
    pub fn shutdown(&mut self) {
        self.persist();
        let errors = self.lifecycle().stop_all();
        for err in &errors {
            tracing::warn!(addon = %err.name, "Stop on shutdown failed: {}", err.cause.message);
        }
        let dropped = lua_api::take_requests(&self.host);
        if !dropped.is_empty() {
            tracing::debug!("Ignoring {} addon request(s) queued during shutdown", dropped.len());
        }
        self.flush_notifications();
        let states = self.registry.teardown();
        tracing::info!("Addon manager shut down ({} tracked addon(s))", states.len());
    }

    fn lifecycle(&mut self) -> AddonLifecycleController<'_> {
        AddonLifecycleController::new(&mut self.registry, &mut self.events)
    }

    fn resolve(&self, target: AddonRef<'_>) -> Result<String, LifecycleError> {
        self.registry
            .resolve(target)
            .ok_or_else(|| LifecycleError::NotFound(target.to_string()))
    }

    /// Loads one file inside a batch. Returns the id if a record was added.
    fn load_one(&mut self, file: &Path, batch: &Batch) -> Option<String> {
        let existed = self.registry.by_filename(file).is_some();
        let result = self.loader.load(&mut self.registry, file);

        let added = if existed {
            None
        } else {
            self.registry.by_filename(file).map(|r| r.id.clone())
        };
        if let Some(id) = &added {
            self.events.emit(ManagerEvent::Loaded { id: id.clone() });
        }
        if let Err(err) = result {
            self.errors.record(batch, err);
        }
        added
    }

    /// Starts the given records that are enabled and runnable.
    fn start_enabled(&mut self, ids: &[String], batch: &Batch) {
        for id in ids {
            let runnable = self
                .registry
                .get(id)
                .is_some_and(|r| !r.is_partial() && !r.is_started());
            if !runnable || !self.registry.is_enabled(id) {
                continue;
            }
            if let Err(err) = self.lifecycle().enable(id) {
                self.note(batch, &err);
            }
        }
    }

    fn finish(
        &mut self,
        batch: &Batch,
        result: Result<(), LifecycleError>,
    ) -> Result<(), LifecycleError> {
        if let Err(err) = &result {
            self.note(batch, err);
        }
        self.drain_host();
        self.persist();
        result
    }

    fn note(&mut self, batch: &Batch, err: &LifecycleError) {
        match err.addon_error() {
            Some(addon_err) => self.errors.record(batch, addon_err.clone()),
            None => tracing::warn!("{}", err),
        }
    }

    /// Applies lifecycle requests queued by addon code, then turns queued
    /// notifications into toasts.
    fn drain_host(&mut self) {
        let mut began = false;
        for _ in 0..MAX_DEFERRED_ROUNDS {
            let requests = lua_api::take_requests(&self.host);
            if requests.is_empty() {
                break;
            }
            if !began {
                self.errors.begin(Batch::Deferred);
                began = true;
            }

            for request in requests {
                let (target, result) = match &request {
                    HostRequest::Enable(target) => {
                        let result = self
                            .resolve(AddonRef::Id(target))
                            .and_then(|id| self.lifecycle().enable(&id));
                        (target, result)
                    }
                    HostRequest::Disable(target) => {
                        let result = self
                            .resolve(AddonRef::Id(target))
                            .and_then(|id| self.lifecycle().disable(&id));
                        (target, result)
                    }
                };
                if let Err(err) = result {
                    tracing::warn!(addon = %target, "Deferred {:?} failed: {}", request, err);
                    self.note(&Batch::Deferred, &err);
                }
            }
        }

        let leftover = lua_api::take_requests(&self.host);
        if !leftover.is_empty() {
            tracing::warn!(
                "Dropped {} addon request(s) after {} rounds",
                leftover.len(),
                MAX_DEFERRED_ROUNDS
            );
        }

        self.flush_notifications();
    }

    fn flush_notifications(&mut self) {
        for note in lua_api::take_notifications(&self.host) {
            self.events
                .toast(ToastLevel::Info, format!("{}: {}", note.source, note.message));
        }
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.save_all(self.registry.enabled_map()) {
            tracing::warn!("Failed to persist addon state: {}", e);
        }
    }
}
