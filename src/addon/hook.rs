//! Addon hooks and guarded invocation.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use super::error::Fault;
use super::source::AddonInstance;

/// A named entry point an addon instance may implement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Called once after construction.
    Load,
    /// Called when the addon is enabled.
    Start,
    /// Called when the addon is disabled.
    Stop,
    /// Host navigated to a new page.
    OnSwitch,
    /// One observed mutation record.
    Observer,
    /// Any other host event, dispatched to a method of the same name.
    Custom(String),
}

impl Hook {
    /// Method name looked up on the instance.
    #[must_use]
    pub fn method_name(&self) -> &str {
        match self {
            Hook::Load => "load",
            Hook::Start => "start",
            Hook::Stop => "stop",
            Hook::OnSwitch => "on_switch",
            Hook::Observer => "observer",
            Hook::Custom(name) => name,
        }
    }
}

/// Instance methods that custom host events may not target.
const RESERVED_METHODS: [&str; 10] = [
    "new",
    "load",
    "start",
    "stop",
    "on_switch",
    "observer",
    "get_name",
    "get_author",
    "get_description",
    "get_version",
];

impl Hook {
    /// True for a custom hook named like a lifecycle hook or accessor.
    #[must_use]
    pub fn is_reserved_custom(&self) -> bool {
        matches!(self, Hook::Custom(name) if RESERVED_METHODS.contains(&name.as_str()))
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}()", self.method_name())
    }
}

/// Which of the well-known hooks an instance implements.
///
/// Detected once after construction and cached on the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub load: bool,
    pub start: bool,
    pub stop: bool,
    pub on_switch: bool,
    pub observer: bool,
}

impl Capabilities {
    /// Checks an instance for every well-known hook.
    #[must_use]
    pub fn detect(instance: &dyn AddonInstance) -> Self {
        Self {
            load: instance.has_hook(&Hook::Load),
            start: instance.has_hook(&Hook::Start),
            stop: instance.has_hook(&Hook::Stop),
            on_switch: instance.has_hook(&Hook::OnSwitch),
            observer: instance.has_hook(&Hook::Observer),
        }
    }

    /// Cached answer for a well-known hook; `None` for custom hooks.
    #[must_use]
    pub fn supports(&self, hook: &Hook) -> Option<bool> {
        match hook {
            Hook::Load => Some(self.load),
            Hook::Start => Some(self.start),
            Hook::Stop => Some(self.stop),
            Hook::OnSwitch => Some(self.on_switch),
            Hook::Observer => Some(self.observer),
            Hook::Custom(_) => None,
        }
    }
}

/// Runs addon code, converting both returned faults and panics into a [`Fault`].
pub fn guarded<T>(f: impl FnOnce() -> Result<T, Fault>) -> Result<T, Fault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Fault::from_panic(payload.as_ref())),
    }
}

/// Invokes a hook on an instance inside [`guarded`].
pub fn invoke(
    instance: &mut dyn AddonInstance,
    hook: &Hook,
    payload: Option<&serde_json::Value>,
) -> Result<(), Fault> {
    guarded(|| instance.call(hook, payload))
}
