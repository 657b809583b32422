//! Addon failure records.
//!
//! Every fault raised by addon code (compile, export, construction, hook) is
//! converted into one [`AddonError`] shape at the point where it happened.

use std::any::Any;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hook::Hook;

/// Marker that separates a Lua error message from its traceback.
const TRACEBACK_MARKER: &str = "stack traceback:";

/// Message and stack of a fault raised inside addon code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Error message, without source location prefix.
    pub message: String,
    /// Stack trace or location info (may be empty).
    pub stack: String,
}

impl Fault {
    /// Creates a fault with a message and no stack.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: String::new(),
        }
    }

    /// Creates a fault with a message and stack.
    #[must_use]
    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Builds a fault from a Lua error.
    ///
    /// Runtime errors carry `file:line: message` followed by a traceback; the
    /// location moves into the stack so `message` is what the addon raised.
    #[must_use]
    pub fn from_lua(err: &mlua::Error) -> Self {
        match err {
            mlua::Error::CallbackError { traceback, cause } => {
                let mut fault = Self::from_lua(cause);
                if fault.stack.is_empty() {
                    fault.stack = traceback.clone();
                }
                fault
            }
            mlua::Error::RuntimeError(text) => Self::from_lua_text(text),
            mlua::Error::SyntaxError { message, .. } => Self::from_lua_text(message),
            other => Self::from_lua_text(&other.to_string()),
        }
    }

    /// Splits raw Lua error text into message and stack.
    #[must_use]
    pub fn from_lua_text(text: &str) -> Self {
        let (head, traceback) = match text.find(TRACEBACK_MARKER) {
            Some(idx) => (&text[..idx], text[idx..].trim_end()),
            None => (text, ""),
        };
        let head = head.trim();
        let (location, message) = split_location(head);

        let stack = match (location, traceback.is_empty()) {
            (Some(loc), true) => loc.to_string(),
            (Some(loc), false) => format!("{}\n{}", loc, traceback),
            (None, _) => traceback.to_string(),
        };

        Self {
            message: message.to_string(),
            stack,
        }
    }

    /// Builds a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "addon panicked".to_string()
        };
        Self::with_stack(message, "panic")
    }
}

impl From<mlua::Error> for Fault {
    fn from(err: mlua::Error) -> Self {
        Self::from_lua(&err)
    }
}

/// Splits `chunk:12: message` into `(Some("chunk:12"), "message")`.
fn split_location(text: &str) -> (Option<&str>, &str) {
    let Some((location, rest)) = text.split_once(": ") else {
        return (None, text);
    };
    let is_line_number = location
        .rsplit_once(':')
        .is_some_and(|(_, line)| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()));
    if is_line_number {
        (Some(location), rest)
    } else {
        (None, text)
    }
}

/// Which step produced an [`AddonError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonErrorKind {
    /// Source could not be turned into an executable module.
    Compile,
    /// Module produced no usable constructor.
    Export,
    /// Constructor (or a metadata accessor) raised.
    Construction,
    /// A lifecycle or event hook raised.
    Hook(Hook),
    /// The file is already loaded.
    Duplicate,
    /// The derived id belongs to a different file.
    Collision,
}

/// Uniform failure record handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {reason} {}", .cause.message)]
pub struct AddonError {
    /// Addon display name (or filename-derived default).
    pub name: String,
    /// Backing file.
    pub filename: PathBuf,
    /// Short human-readable reason.
    pub reason: String,
    /// Failure class.
    pub kind: AddonErrorKind,
    /// Underlying fault.
    pub cause: Fault,
}

impl AddonError {
    /// Creates a new addon error.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        filename: &Path,
        reason: impl Into<String>,
        kind: AddonErrorKind,
        cause: Fault,
    ) -> Self {
        Self {
            name: name.into(),
            filename: filename.to_path_buf(),
            reason: reason.into(),
            kind,
            cause,
        }
    }

    /// Source failed to compile or raised at top level.
    #[must_use]
    pub fn compile(name: &str, filename: &Path, cause: Fault) -> Self {
        Self::new(name, filename, "Could not be compiled", AddonErrorKind::Compile, cause)
    }

    /// Module exported no constructor.
    #[must_use]
    pub fn no_exports(name: &str, filename: &Path) -> Self {
        Self::new(
            name,
            filename,
            format!("{} had no exports", name),
            AddonErrorKind::Export,
            Fault::new("Plugin had no exports or no name property."),
        )
    }

    /// Constructor raised.
    #[must_use]
    pub fn construction(name: &str, filename: &Path, cause: Fault) -> Self {
        Self::new(
            name,
            filename,
            "Could not be constructed",
            AddonErrorKind::Construction,
            cause,
        )
    }

    /// A hook raised.
    #[must_use]
    pub fn hook(name: &str, filename: &Path, hook: &Hook, cause: Fault) -> Self {
        Self::new(
            name,
            filename,
            format!("{}() could not be fired.", hook.method_name()),
            AddonErrorKind::Hook(hook.clone()),
            cause,
        )
    }

    /// File is already present in the registry.
    #[must_use]
    pub fn duplicate(name: &str, filename: &Path) -> Self {
        Self::new(
            name,
            filename,
            "Already loaded",
            AddonErrorKind::Duplicate,
            Fault::new(format!("{} is already loaded", filename.display())),
        )
    }

    /// Derived id is taken by another file.
    #[must_use]
    pub fn collision(name: &str, filename: &Path, id: &str, owner: &Path) -> Self {
        Self::new(
            name,
            filename,
            "Id collision",
            AddonErrorKind::Collision,
            Fault::new(format!(
                "id '{}' is already used by {}",
                id,
                owner.display()
            )),
        )
    }
}

/// Source compilation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .filename.display(), .fault.message)]
pub struct CompileError {
    /// File that failed.
    pub filename: PathBuf,
    /// Message and stack.
    pub fault: Fault,
}

impl CompileError {
    /// Creates a compile error.
    #[must_use]
    pub fn new(filename: &Path, fault: Fault) -> Self {
        Self {
            filename: filename.to_path_buf(),
            fault,
        }
    }
}

/// Errors returned by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No record matches the given id or filename.
    #[error("Addon not found: {0}")]
    NotFound(String),

    /// Record has no instance (partial load) and cannot be started.
    #[error("Addon {0} is not runnable (partial load)")]
    NotRunnable(String),

    /// A hook or load step failed.
    #[error(transparent)]
    Addon(#[from] AddonError),
}

impl LifecycleError {
    /// Returns the addon error, if this is one.
    #[must_use]
    pub fn addon_error(&self) -> Option<&AddonError> {
        match self {
            LifecycleError::Addon(e) => Some(e),
            _ => None,
        }
    }
}
