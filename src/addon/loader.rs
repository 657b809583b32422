//! Addon loader.
//!
//! Turns a filename into a registered [`AddonRecord`]: compile, validate the
//! exported constructor, construct, read instance metadata, fire `load()`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::{AddonError, AddonErrorKind, Fault};
use super::hook::{self, Capabilities, Hook};
use super::record::{AddonRecord, AddonState};
use super::registry::AddonRegistry;
use super::source::{AddonInstance, AddonMetadata, CompiledModule, ModuleLoader};
use super::storage::is_valid_id;

/// Maximum number of files considered in one directory scan.
const MAX_DISCOVERED_FILES: usize = 1000;

/// Case-insensitive `strip_suffix`.
#[must_use]
pub fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    if value.len() < suffix.len() || !value.is_char_boundary(value.len() - suffix.len()) {
        return None;
    }
    let (head, tail) = value.split_at(value.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

/// Record built from one file plus the non-fatal error that left it partial
/// or not auto-startable.
type Built = (AddonRecord, Option<AddonError>);

/// Loads addon files from one directory through a [`ModuleLoader`].
pub struct AddonLoader {
    modules: Box<dyn ModuleLoader>,
    dir: PathBuf,
}

impl AddonLoader {
    /// Creates a loader for `dir`.
    #[must_use]
    pub fn new(modules: Box<dyn ModuleLoader>, dir: PathBuf) -> Self {
        Self { modules, dir }
    }

    /// Addon directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File suffix handled by the module loader.
    #[must_use]
    pub fn extension(&self) -> &str {
        self.modules.extension()
    }

    /// File name with the addon extension stripped, original case.
    #[must_use]
    pub fn default_name(&self, path: &Path) -> String {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        strip_suffix_ignore_case(file_name, self.extension())
            .unwrap_or(file_name)
            .to_string()
    }

    /// Stable id for a file: stripped name, lowercased.
    ///
    /// `None` for other files and for names that cannot be persisted as an
    /// id (empty, whitespace, `=` or `#`).
    #[must_use]
    pub fn derive_id(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_str()?;
        let stem = strip_suffix_ignore_case(file_name, self.extension())?;
        is_valid_id(stem).then(|| stem.to_lowercase())
    }

    /// Joins relative filenames onto the addon directory.
    #[must_use]
    pub fn resolve_path(&self, filename: &Path) -> PathBuf {
        if filename.is_absolute() {
            filename.to_path_buf()
        } else {
            self.dir.join(filename)
        }
    }

    /// Lists addon files in the directory (non-recursive, sorted by name).
    pub fn discover(&self) -> io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.derive_id(path).is_some())
            .collect();
        files.sort();
        if files.len() > MAX_DISCOVERED_FILES {
            tracing::warn!(
                dir = %self.dir.display(),
                "Only the first {} of {} addon files are loaded",
                MAX_DISCOVERED_FILES,
                files.len()
            );
            files.truncate(MAX_DISCOVERED_FILES);
        }
        Ok(files)
    }

    /// Loads one file and registers it.
    ///
    /// On `Err` the record may still have been registered: a module without
    /// exports or whose constructor raised is kept as a partial record, and
    /// one whose `load()` raised is kept ready but disabled. Compile errors
    /// and id collisions leave the registry untouched.
    pub fn load(&self, registry: &mut AddonRegistry, filename: &Path) -> Result<String, AddonError> {
        let path = self.resolve_path(filename);
        let name = self.default_name(&path);

        let id = self.derive_id(&path).ok_or_else(|| {
            AddonError::compile(
                &name,
                &path,
                Fault::new(format!(
                    "File name must end with {} and contain no spaces, '=' or '#'",
                    self.extension()
                )),
            )
        })?;

        if let Some(existing) = registry.get(&id) {
            let err = if existing.filename == path {
                AddonError::duplicate(&name, &path)
            } else {
                AddonError::collision(&name, &path, &id, &existing.filename)
            };
            tracing::warn!(addon = %id, file = %path.display(), "{}", err.cause.message);
            return Err(err);
        }

        let (record, error) = self.build(id.clone(), &path)?;
        settle_enabled(registry, &id, error.as_ref());

        tracing::info!(
            addon = %id,
            name = %record.name,
            version = %record.version,
            state = %record.state,
            "Loaded addon"
        );
        registry.insert(record);

        match error {
            Some(err) => Err(err),
            None => Ok(id),
        }
    }

    /// Rebuilds an existing record in place from its file.
    ///
    /// The previous instance must already be stopped and detached. If the
    /// file no longer compiles the record is removed; the enabled entry is
    /// kept either way.
    pub fn rebuild(
        &self,
        registry: &mut AddonRegistry,
        id: &str,
        path: &Path,
    ) -> Result<(), AddonError> {
        match self.build(id.to_string(), path) {
            Err(err) => {
                registry.remove(id);
                tracing::warn!(addon = %id, "Reload failed to compile: {}", err.cause.message);
                Err(err)
            }
            Ok((record, error)) => {
                settle_enabled(registry, id, error.as_ref());
                registry.replace(record);
                error.map_or(Ok(()), Err)
            }
        }
    }

    fn build(&self, id: String, path: &Path) -> Result<Built, AddonError> {
        let default_name = self.default_name(path);

        let CompiledModule { metadata, factory } = self.modules.compile(path).map_err(|e| {
            tracing::error!(file = %path.display(), "Could not compile addon: {}", e);
            AddonError::compile(&default_name, path, e.fault)
        })?;

        let mut record = AddonRecord::new(id, path, &default_name, metadata);

        let Some(factory) = factory else {
            tracing::warn!(addon = %record.id, "Addon has no exports");
            let err = AddonError::no_exports(&record.name, path);
            return Ok((record, Some(err)));
        };

        let constructed = hook::guarded(|| {
            let instance = factory.construct()?;
            let info = instance.info()?;
            Ok((instance, info))
        });
        record.factory = Some(factory);

        let (mut instance, info): (Box<dyn AddonInstance>, AddonMetadata) = match constructed {
            Ok(parts) => parts,
            Err(fault) => {
                tracing::error!(addon = %record.name, "Could not be constructed: {}", fault.message);
                let err = AddonError::construction(&record.name, path, fault);
                return Ok((record, Some(err)));
            }
        };

        record.apply_metadata(info);
        record.capabilities = Capabilities::detect(instance.as_ref());

        let mut load_error = None;
        if record.capabilities.load {
            if let Err(fault) = hook::invoke(instance.as_mut(), &Hook::Load, None) {
                tracing::error!(addon = %record.name, "load() could not be fired: {}", fault.message);
                load_error = Some(AddonError::hook(&record.name, path, &Hook::Load, fault));
            }
        }

        record.instance = Some(instance);
        record.state = AddonState::Ready;
        Ok((record, load_error))
    }
}

/// A record left partial, or whose `load()` failed, is forced disabled.
fn settle_enabled(registry: &mut AddonRegistry, id: &str, error: Option<&AddonError>) {
    let disable = matches!(
        error.map(|e| &e.kind),
        Some(AddonErrorKind::Export | AddonErrorKind::Construction | AddonErrorKind::Hook(Hook::Load))
    );
    if disable {
        registry.set_enabled(id, false);
    }
}
