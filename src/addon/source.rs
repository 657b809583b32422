//! Addon source seam.
//!
//! A [`ModuleLoader`] turns one addon file into a [`CompiledModule`]: the
//! metadata the module reports about itself plus a factory for instances.
//! This is the only part that differs per addon language.

use std::any::Any;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{CompileError, Fault};
use super::hook::Hook;

/// Self-reported addon metadata. Missing fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl AddonMetadata {
    /// Fills every missing field from `other`.
    #[must_use]
    pub fn or(self, other: AddonMetadata) -> Self {
        Self {
            name: non_empty(self.name).or(other.name),
            author: non_empty(self.author).or(other.author),
            description: non_empty(self.description).or(other.description),
            version: non_empty(self.version).or(other.version),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A constructed addon object.
pub trait AddonInstance {
    /// Whether the instance implements `hook`.
    fn has_hook(&self, hook: &Hook) -> bool;

    /// Invokes `hook`. Only called when [`has_hook`](Self::has_hook) is true.
    fn call(&mut self, hook: &Hook, payload: Option<&serde_json::Value>) -> Result<(), Fault>;

    /// Metadata reported by the instance accessors.
    fn info(&self) -> Result<AddonMetadata, Fault> {
        Ok(AddonMetadata::default())
    }

    /// Downcast support for hosts that know the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// The exported constructor of a module.
pub trait AddonFactory {
    /// Constructs a fresh instance.
    fn construct(&self) -> Result<Box<dyn AddonInstance>, Fault>;
}

/// Result of compiling one addon file.
pub struct CompiledModule {
    /// Metadata taken from the module exports.
    pub metadata: AddonMetadata,
    /// Constructor, if the module exported one.
    pub factory: Option<Box<dyn AddonFactory>>,
}

impl CompiledModule {
    /// Module with metadata and a constructor.
    #[must_use]
    pub fn new(metadata: AddonMetadata, factory: Box<dyn AddonFactory>) -> Self {
        Self {
            metadata,
            factory: Some(factory),
        }
    }

    /// Module that exported nothing usable.
    #[must_use]
    pub fn without_exports(metadata: AddonMetadata) -> Self {
        Self {
            metadata,
            factory: None,
        }
    }
}

/// Loads addon modules of one kind from disk.
pub trait ModuleLoader {
    /// File suffix identifying this addon type (e.g. `.addon.lua`).
    fn extension(&self) -> &str;

    /// Reads and executes `path`, returning its exports.
    ///
    /// Errors raised later, during construction, are not caught here.
    fn compile(&self, path: &Path) -> Result<CompiledModule, CompileError>;
}
