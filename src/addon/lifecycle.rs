//! Addon lifecycle transitions.
//!
//! Enforces the per-addon state machine
//! `Partial | Ready -> Started <-> Stopped`, wrapping every hook call so a
//! fault becomes an [`AddonError`] and never escapes to the caller's caller.

use super::error::{AddonError, LifecycleError};
use super::events::{EventEmitter, ManagerEvent, ToastLevel};
use super::hook::{self, Hook};
use super::record::AddonState;
use super::registry::AddonRegistry;

/// Outcome of one hook call on a record, captured before the borrow ends.
struct HookOutcome {
    name: String,
    version: String,
    error: Option<AddonError>,
}

/// Drives lifecycle transitions over a borrowed registry.
pub struct AddonLifecycleController<'a> {
    registry: &'a mut AddonRegistry,
    events: &'a mut EventEmitter,
}

impl<'a> AddonLifecycleController<'a> {
    /// Creates a controller.
    pub fn new(registry: &'a mut AddonRegistry, events: &'a mut EventEmitter) -> Self {
        Self { registry, events }
    }

    /// Starts an addon.
    ///
    /// A started addon is left alone. A partial record is rejected. A
    /// failing `start()` leaves the state unchanged and the addon disabled.
    pub fn enable(&mut self, id: &str) -> Result<(), LifecycleError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if record.is_started() {
            return Ok(());
        }
        if record.is_partial() {
            tracing::warn!(addon = %record.name, "Cannot start a partially loaded addon");
            self.registry.set_enabled(id, false);
            return Err(LifecycleError::NotRunnable(id.to_string()));
        }

        let outcome = self.fire(id, Hook::Start, AddonState::Started, None);
        let label = format!("{} v{}", outcome.name, outcome.version);

        match outcome.error {
            None => {
                self.registry.set_enabled(id, true);
                tracing::info!(addon = %outcome.name, "Started addon");
                self.events.emit(ManagerEvent::Started { id: id.to_string() });
                self.events
                    .toast(ToastLevel::Success, format!("{} has started.", label));
                Ok(())
            }
            Some(err) => {
                self.registry.set_enabled(id, false);
                self.events
                    .toast(ToastLevel::Error, format!("{} could not be started.", label));
                Err(err.into())
            }
        }
    }

    /// Stops an addon.
    ///
    /// An addon that is not running only has its enabled flag cleared. A
    /// failing `stop()` still counts as stopped.
    pub fn disable(&mut self, id: &str) -> Result<(), LifecycleError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if !record.is_started() {
            self.registry.set_enabled(id, false);
            return Ok(());
        }

        let outcome = self.fire(id, Hook::Stop, AddonState::Stopped, Some(AddonState::Stopped));
        let label = format!("{} v{}", outcome.name, outcome.version);
        self.registry.set_enabled(id, false);

        match outcome.error {
            None => {
                tracing::info!(addon = %outcome.name, "Stopped addon");
                self.events.emit(ManagerEvent::Stopped { id: id.to_string() });
                self.events
                    .toast(ToastLevel::Success, format!("{} has stopped.", label));
                Ok(())
            }
            Some(err) => {
                self.events
                    .toast(ToastLevel::Error, format!("{} could not be stopped.", label));
                Err(err.into())
            }
        }
    }

    /// Disables a running addon and enables any other.
    ///
    /// An addon persisted as enabled but never started (autostart off) is
    /// started rather than switched off.
    pub fn toggle(&mut self, id: &str) -> Result<(), LifecycleError> {
        let running = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?
            .is_started();
        if running && self.registry.is_enabled(id) {
            self.disable(id)
        } else {
            self.enable(id)
        }
    }

    /// Removes an addon from the registry, stopping it first if needed.
    ///
    /// The record is removed and its enabled entry deleted even when `stop()`
    /// fails; that error is returned afterwards.
    pub fn unload(&mut self, id: &str) -> Result<(), LifecycleError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        let stop_result = if record.is_started() || self.registry.is_enabled(id) {
            self.disable(id)
        } else {
            Ok(())
        };

        if let Some(mut record) = self.registry.remove(id) {
            drop(record.detach());
            tracing::info!(addon = %record.name, "Unloaded addon");
        }
        self.registry.forget(id);
        self.events.emit(ManagerEvent::Unloaded { id: id.to_string() });

        stop_result
    }

    /// Stops (if running) and drops the instance of an addon ahead of a
    /// rebuild. The enabled flag is kept unless `stop()` fails.
    pub fn suspend(&mut self, id: &str) -> Result<(), LifecycleError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        let mut result = Ok(());
        if record.is_started() {
            let outcome = self.fire(id, Hook::Stop, AddonState::Stopped, Some(AddonState::Stopped));
            match outcome.error {
                None => self.events.emit(ManagerEvent::Stopped { id: id.to_string() }),
                Some(err) => {
                    self.registry.set_enabled(id, false);
                    result = Err(err.into());
                }
            }
        }

        if let Some(record) = self.registry.get_mut(id) {
            drop(record.detach());
        }
        result
    }

    /// Stops every started addon without touching the enabled flags.
    ///
    /// Returns the faults raised along the way.
    pub fn stop_all(&mut self) -> Vec<AddonError> {
        let mut errors = Vec::new();
        for id in self.registry.started_ids() {
            let outcome = self.fire(&id, Hook::Stop, AddonState::Stopped, Some(AddonState::Stopped));
            match outcome.error {
                None => self.events.emit(ManagerEvent::Stopped { id }),
                Some(err) => errors.push(err),
            }
        }
        errors
    }

    /// Invokes a lifecycle hook on a record.
    ///
    /// The record moves to `on_success` if the hook is absent or returns
    /// normally, and to `on_failure` (if given) when it raises.
    fn fire(
        &mut self,
        id: &str,
        hook: Hook,
        on_success: AddonState,
        on_failure: Option<AddonState>,
    ) -> HookOutcome {
        let Some(record) = self.registry.get_mut(id) else {
            return HookOutcome {
                name: id.to_string(),
                version: String::new(),
                error: None,
            };
        };

        let supported = record.capabilities.supports(&hook).unwrap_or(false);
        let result = match record.instance.as_deref_mut() {
            Some(instance) if supported => hook::invoke(instance, &hook, None),
            _ => Ok(()),
        };

        let error = match result {
            Ok(()) => {
                record.state = on_success;
                None
            }
            Err(fault) => {
                tracing::error!(
                    addon = %record.name,
                    operation = %hook,
                    "{} could not be fired: {}",
                    hook,
                    fault.message
                );
                if let Some(state) = on_failure {
                    record.state = state;
                }
                Some(AddonError::hook(&record.name, &record.filename, &hook, fault))
            }
        };

        HookOutcome {
            name: record.name.clone(),
            version: record.version.clone(),
            error,
        }
    }
}
