//! Host API for Lua addons.
//!
//! Provides the `host` table available to every Lua addon. Calls that would
//! change lifecycle state are queued in [`HostState`] and applied by the
//! manager once the current operation has returned, so a hook never re-enters
//! the manager while it is running.

use std::sync::{Arc, Mutex};

use mlua::{Lua, Result as LuaResult, Table};

use crate::logging::SCRIPT_TARGET;

/// Lifecycle request made by addon code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// Enable the addon with this id.
    Enable(String),
    /// Disable the addon with this id.
    Disable(String),
}

/// Message posted by an addon through `host.notify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNotification {
    /// Addon that posted it.
    pub source: String,
    /// Message text.
    pub message: String,
}

/// State shared between the manager and addon callbacks.
#[derive(Debug, Default)]
pub struct HostState {
    /// Pending notifications.
    pub notifications: Vec<HostNotification>,
    /// Pending lifecycle requests, in call order.
    pub requests: Vec<HostRequest>,
}

/// Shared handle to [`HostState`].
pub type HostHandle = Arc<Mutex<HostState>>;

/// Creates a fresh host handle.
#[must_use]
pub fn new_handle() -> HostHandle {
    Arc::new(Mutex::new(HostState::default()))
}

/// Queues a lifecycle request.
pub fn push_request(host: &HostHandle, request: HostRequest) {
    if let Ok(mut s) = host.lock() {
        s.requests.push(request);
    }
}

/// Takes all pending requests.
#[must_use]
pub fn take_requests(host: &HostHandle) -> Vec<HostRequest> {
    host.lock()
        .map(|mut s| std::mem::take(&mut s.requests))
        .unwrap_or_default()
}

/// Takes all pending notifications.
#[must_use]
pub fn take_notifications(host: &HostHandle) -> Vec<HostNotification> {
    host.lock()
        .map(|mut s| std::mem::take(&mut s.notifications))
        .unwrap_or_default()
}

/// Registers the `host` global table for one addon.
pub fn register_api(lua: &Lua, host: HostHandle, source: &str) -> LuaResult<()> {
    let table = lua.create_table()?;
    register_functions(lua, &table, host, source)?;
    table.set("version", env!("CARGO_PKG_VERSION"))?;
    lua.globals().set("host", table)?;
    Ok(())
}

fn register_functions(lua: &Lua, table: &Table, host: HostHandle, source: &str) -> LuaResult<()> {
    // host.notify(message)
    let host_clone = host.clone();
    let source_name = source.to_string();
    let notify = lua.create_function(move |_, message: String| {
        if let Ok(mut s) = host_clone.lock() {
            s.notifications.push(HostNotification {
                source: source_name.clone(),
                message,
            });
        }
        Ok(())
    })?;
    table.set("notify", notify)?;

    // host.log(message)
    let source_name = source.to_string();
    let log = lua.create_function(move |_, message: String| {
        tracing::info!(target: SCRIPT_TARGET, addon = %source_name, "{}", message);
        Ok(())
    })?;
    table.set("log", log)?;

    // host.enable(id)
    let host_clone = host.clone();
    let enable = lua.create_function(move |_, id: String| {
        push_request(&host_clone, HostRequest::Enable(id));
        Ok(())
    })?;
    table.set("enable", enable)?;

    // host.disable(id)
    let disable = lua.create_function(move |_, id: String| {
        push_request(&host, HostRequest::Disable(id));
        Ok(())
    })?;
    table.set("disable", disable)?;

    Ok(())
}
