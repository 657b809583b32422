//! Addon records.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::hook::Capabilities;
use super::source::{AddonFactory, AddonInstance, AddonMetadata};

/// Default author shown when an addon does not report one.
pub const DEFAULT_AUTHOR: &str = "No author";

/// Default description shown when an addon does not report one.
pub const DEFAULT_DESCRIPTION: &str = "No description";

/// Default version shown when an addon does not report one.
pub const DEFAULT_VERSION: &str = "No version";

/// Lifecycle state of a registered addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonState {
    /// Metadata known but no instance; listed, never runnable.
    Partial,
    /// Constructed and loaded, never started.
    Ready,
    /// `start()` succeeded.
    Started,
    /// Stopped after running.
    Stopped,
}

impl fmt::Display for AddonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddonState::Partial => write!(f, "partial"),
            AddonState::Ready => write!(f, "ready"),
            AddonState::Started => write!(f, "started"),
            AddonState::Stopped => write!(f, "stopped"),
        }
    }
}

/// One discovered addon.
pub struct AddonRecord {
    /// Stable id derived from the filename.
    pub id: String,
    /// Backing file.
    pub filename: PathBuf,
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    /// Exported constructor, if the module had one.
    pub(crate) factory: Option<Box<dyn AddonFactory>>,
    /// Constructed instance, exclusively owned by this record.
    pub(crate) instance: Option<Box<dyn AddonInstance>>,
    /// Hooks the instance implements.
    pub capabilities: Capabilities,
    pub(crate) state: AddonState,
}

impl AddonRecord {
    /// Creates a partial record from metadata, filling defaults.
    #[must_use]
    pub fn new(id: String, filename: &Path, default_name: &str, metadata: AddonMetadata) -> Self {
        Self {
            id,
            filename: filename.to_path_buf(),
            name: metadata.name.unwrap_or_else(|| default_name.to_string()),
            author: metadata.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            description: metadata
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            version: metadata.version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            factory: None,
            instance: None,
            capabilities: Capabilities::default(),
            state: AddonState::Partial,
        }
    }

    /// Overrides display metadata with instance-reported values.
    pub fn apply_metadata(&mut self, metadata: AddonMetadata) {
        let AddonMetadata {
            name,
            author,
            description,
            version,
        } = metadata;
        let keep = |value: Option<String>, slot: &mut String| {
            if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                *slot = v;
            }
        };
        keep(name, &mut self.name);
        keep(author, &mut self.author);
        keep(description, &mut self.description);
        keep(version, &mut self.version);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AddonState {
        self.state
    }

    /// True when no instance could be constructed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.instance.is_none()
    }

    /// True when `start()` has succeeded and `stop()` has not run since.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state == AddonState::Started
    }

    /// True when the module exported a constructor.
    #[must_use]
    pub fn has_type(&self) -> bool {
        self.factory.is_some()
    }

    /// The constructed instance.
    #[must_use]
    pub fn instance(&self) -> Option<&dyn AddonInstance> {
        self.instance.as_deref()
    }

    /// Downcasts the instance to a concrete type.
    #[must_use]
    pub fn instance_as<T: 'static>(&self) -> Option<&T> {
        self.instance().and_then(|i| i.as_any().downcast_ref::<T>())
    }

    /// Drops the instance; the record becomes partial.
    pub(crate) fn detach(&mut self) -> Option<Box<dyn AddonInstance>> {
        self.state = AddonState::Partial;
        self.capabilities = Capabilities::default();
        self.instance.take()
    }

    /// Serializable snapshot of this record.
    #[must_use]
    pub fn summary(&self, enabled: bool) -> AddonSummary {
        AddonSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            name: self.name.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            state: self.state,
            partial: self.is_partial(),
            enabled,
        }
    }
}

impl fmt::Debug for AddonRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonRecord")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("has_type", &self.has_type())
            .field("has_instance", &self.instance.is_some())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Plain-data view of a record for listing and UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSummary {
    pub id: String,
    pub filename: PathBuf,
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub state: AddonState,
    pub partial: bool,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = AddonRecord::new(
            "foo".into(),
            Path::new("/addons/foo.addon.lua"),
            "foo",
            AddonMetadata::default(),
        );
        assert_eq!(record.name, "foo");
        assert_eq!(record.author, DEFAULT_AUTHOR);
        assert_eq!(record.description, DEFAULT_DESCRIPTION);
        assert_eq!(record.version, DEFAULT_VERSION);
        assert!(record.is_partial());
        assert!(!record.has_type());
        assert_eq!(record.state(), AddonState::Partial);
    }

    #[test]
    fn test_apply_metadata_keeps_existing() {
        let mut record = AddonRecord::new(
            "foo".into(),
            Path::new("foo.addon.lua"),
            "foo",
            AddonMetadata {
                name: Some("Foo".into()),
                version: Some("1.0".into()),
                ..AddonMetadata::default()
            },
        );
        record.apply_metadata(AddonMetadata {
            name: Some(String::new()),
            author: Some("Ann".into()),
            ..AddonMetadata::default()
        });
        assert_eq!(record.name, "Foo");
        assert_eq!(record.author, "Ann");
        assert_eq!(record.version, "1.0");
    }

    #[test]
    fn test_summary() {
        let record = AddonRecord::new(
            "foo".into(),
            Path::new("foo.addon.lua"),
            "foo",
            AddonMetadata::default(),
        );
        let summary = record.summary(false);
        assert_eq!(summary.id, "foo");
        assert!(summary.partial);
        assert!(!summary.enabled);
        assert_eq!(summary.state, AddonState::Partial);
    }
}
