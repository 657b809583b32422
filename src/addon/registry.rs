//! Addon registry.
//!
//! Ordered collection of [`AddonRecord`]s keyed by id, plus the enabled-state
//! map. The map lives here rather than on the record so it survives reloads.

use std::collections::HashMap;
use std::path::Path;

use super::record::{AddonRecord, AddonState};

/// Reference to a registered addon by id, filename, or record.
#[derive(Debug, Clone, Copy)]
pub enum AddonRef<'a> {
    /// Id, or a filename given as a string.
    Id(&'a str),
    /// Filename.
    Path(&'a Path),
}

impl<'a> From<&'a str> for AddonRef<'a> {
    fn from(value: &'a str) -> Self {
        AddonRef::Id(value)
    }
}

impl<'a> From<&'a String> for AddonRef<'a> {
    fn from(value: &'a String) -> Self {
        AddonRef::Id(value.as_str())
    }
}

impl<'a> From<&'a Path> for AddonRef<'a> {
    fn from(value: &'a Path) -> Self {
        AddonRef::Path(value)
    }
}

impl<'a> From<&'a AddonRecord> for AddonRef<'a> {
    fn from(value: &'a AddonRecord) -> Self {
        AddonRef::Id(value.id.as_str())
    }
}

impl std::fmt::Display for AddonRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonRef::Id(id) => write!(f, "{}", id),
            AddonRef::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// In-memory registry of addons.
#[derive(Debug, Default)]
pub struct AddonRegistry {
    /// Records in insertion order.
    records: Vec<AddonRecord>,
    /// Enabled flag by addon id.
    enabled: HashMap<String, bool>,
    /// Whether `init` has been called since the last teardown.
    initialized: bool,
}

impl AddonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the enabled-state map (e.g. from persisted settings).
    pub fn init(&mut self, enabled: HashMap<String, bool>) {
        self.enabled = enabled;
        self.initialized = true;
    }

    /// Drops every record and returns the enabled-state map.
    ///
    /// Callers stop started addons first.
    pub fn teardown(&mut self) -> HashMap<String, bool> {
        self.records.clear();
        self.initialized = false;
        std::mem::take(&mut self.enabled)
    }

    /// Whether `init` has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Adds a record at the end. Returns false (and leaves the registry
    /// untouched) if the id is already present.
    pub fn insert(&mut self, record: AddonRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Replaces the record with the same id in place, keeping its position.
    ///
    /// Returns the previous record.
    pub fn replace(&mut self, record: AddonRecord) -> Option<AddonRecord> {
        let idx = self.position(&record.id)?;
        Some(std::mem::replace(&mut self.records[idx], record))
    }

    /// Removes a record. The enabled entry is kept; see [`Self::forget`].
    pub fn remove(&mut self, id: &str) -> Option<AddonRecord> {
        let idx = self.position(id)?;
        Some(self.records.remove(idx))
    }

    /// Deletes the enabled entry for an id.
    pub fn forget(&mut self, id: &str) {
        self.enabled.remove(id);
    }

    /// Whether a record with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Index of the record with this id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Resolves an id-or-filename reference to an id.
    #[must_use]
    pub fn resolve(&self, target: AddonRef<'_>) -> Option<String> {
        let found = match target {
            AddonRef::Id(key) => self.records.iter().find(|r| {
                r.id == key || r.filename == Path::new(key) || file_name_matches(&r.filename, key)
            }),
            AddonRef::Path(path) => self.records.iter().find(|r| {
                r.filename == path
                    || path
                        .to_str()
                        .is_some_and(|name| file_name_matches(&r.filename, name))
            }),
        };
        found.map(|r| r.id.clone())
    }

    /// Record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AddonRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Mutable record by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut AddonRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Record by filename.
    #[must_use]
    pub fn by_filename(&self, filename: &Path) -> Option<&AddonRecord> {
        self.records.iter().find(|r| r.filename == filename)
    }

    /// Records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[AddonRecord] {
        &self.records
    }

    /// Mutable records in insertion order.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut AddonRecord> {
        self.records.iter_mut()
    }

    /// Ids of records currently started, in order.
    #[must_use]
    pub fn started_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.state == AddonState::Started)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Enabled flag for an id (false if unknown).
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.get(id).copied().unwrap_or(false)
    }

    /// Sets the enabled flag for an id.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        self.enabled.insert(id.to_string(), enabled);
    }

    /// Snapshot of the enabled-state map.
    #[must_use]
    pub fn enabled_map(&self) -> &HashMap<String, bool> {
        &self.enabled
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn file_name_matches(path: &Path, name: &str) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(name)
}
