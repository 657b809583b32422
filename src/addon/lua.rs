//! Lua addon loader.
//!
//! Each addon file runs in its own Lua state with a `module = { exports = {} }`
//! global and the `host` API. The exports (the chunk's return value or
//! `module.exports`) carry metadata and the constructor under `type`.

use std::any::Any;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use serde::Deserialize;

use super::error::{CompileError, Fault};
use super::hook::Hook;
use super::loader::strip_suffix_ignore_case;
use super::lua_api::{self, HostHandle};
use super::source::{AddonFactory, AddonInstance, AddonMetadata, CompiledModule, ModuleLoader};

/// Default file suffix for Lua addons.
pub const LUA_EXTENSION: &str = ".addon.lua";

/// Prefix of the legacy metadata header line.
const META_HEADER: &str = "-- META";

/// Hooks whose presence marks a table as an addon class.
const CLASS_MARKERS: [&str; 6] = ["new", "load", "start", "stop", "on_switch", "observer"];

/// Builds a fresh instance from a class table (`setmetatable({}, {__index = cls})`).
const INSTANTIATE_CLASS: &str = "local cls = ...\nreturn setmetatable({}, { __index = cls })";

/// Loads `*.addon.lua` files.
pub struct LuaLoader {
    extension: String,
    host: HostHandle,
}

impl LuaLoader {
    /// Creates a loader for the default extension.
    #[must_use]
    pub fn new(host: HostHandle) -> Self {
        Self::with_extension(LUA_EXTENSION, host)
    }

    /// Creates a loader for a custom extension.
    #[must_use]
    pub fn with_extension(extension: &str, host: HostHandle) -> Self {
        Self {
            extension: extension.to_string(),
            host,
        }
    }

    fn chunk_label(path: &Path) -> String {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("addon")
            .to_string()
    }

    fn file_stem(&self, path: &Path) -> String {
        let label = Self::chunk_label(path);
        strip_suffix_ignore_case(&label, &self.extension)
            .unwrap_or(&label)
            .to_string()
    }

    fn run(&self, path: &Path, content: &str) -> Result<CompiledModule, Fault> {
        let label = Self::chunk_label(path);
        let lua = Rc::new(Lua::new());

        lua_api::register_api(&lua, self.host.clone(), &self.file_stem(path))?;

        let module = lua.create_table()?;
        module.set("exports", lua.create_table()?)?;
        lua.globals().set("module", module)?;

        let returned: Value = lua
            .load(content)
            .set_name(format!("@{}", label))
            .call(())?;

        let exports = match returned {
            Value::Table(_) | Value::Function(_) => returned,
            _ => {
                let module: Table = lua.globals().get("module")?;
                module.get::<Value>("exports")?
            }
        };

        if is_exported(&exports) {
            return Ok(from_exports(&lua, &exports)?);
        }

        tracing::debug!(file = %label, "no exports, using legacy fallback");
        Ok(legacy_module(&lua, content)?)
    }
}

impl ModuleLoader for LuaLoader {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn compile(&self, path: &Path) -> Result<CompiledModule, CompileError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CompileError::new(path, Fault::new(format!("Failed to read file: {}", e)))
        })?;

        self.run(path, &content)
            .map_err(|fault| CompileError::new(path, fault))
    }
}

fn is_exported(exports: &Value) -> bool {
    match exports {
        Value::Function(_) => true,
        Value::Table(t) => t.clone().pairs::<Value, Value>().next().is_some(),
        _ => false,
    }
}

fn looks_like_class(table: &Table) -> bool {
    CLASS_MARKERS
        .iter()
        .any(|key| matches!(table.get::<Value>(*key), Ok(Value::Function(_))))
}

fn string_field(table: &Table, key: &str) -> Option<String> {
    match table.get::<Value>(key) {
        Ok(Value::String(s)) => s.to_str().ok().map(|s| s.to_string()),
        _ => None,
    }
}

fn metadata_from_table(table: &Table) -> AddonMetadata {
    AddonMetadata {
        name: string_field(table, "name"),
        author: string_field(table, "author"),
        description: string_field(table, "description"),
        version: string_field(table, "version"),
    }
}

fn factory(lua: &Rc<Lua>, ctor: Value) -> Option<Box<dyn AddonFactory>> {
    match ctor {
        Value::Function(_) | Value::Table(_) => Some(Box::new(LuaFactory {
            lua: Rc::clone(lua),
            ctor,
        })),
        _ => None,
    }
}

fn from_exports(lua: &Rc<Lua>, exports: &Value) -> mlua::Result<CompiledModule> {
    let (metadata, ctor) = match exports {
        Value::Table(table) => {
            let metadata = metadata_from_table(table);
            let ctor = match table.get::<Value>("type")? {
                Value::Nil if looks_like_class(table) => exports.clone(),
                other => other,
            };
            (metadata, ctor)
        }
        _ => (AddonMetadata::default(), exports.clone()),
    };

    Ok(match factory(lua, ctor) {
        Some(f) => CompiledModule::new(metadata, f),
        None => CompiledModule::without_exports(metadata),
    })
}

/// Metadata header for addons that export nothing.
#[derive(Debug, Default, Deserialize)]
struct LegacyMeta {
    #[serde(flatten)]
    metadata: AddonMetadata,
    /// Global holding the constructor, if not `name`.
    #[serde(default)]
    exports: Option<String>,
}

fn parse_meta_header(content: &str) -> LegacyMeta {
    let Some(first) = content.lines().next() else {
        return LegacyMeta::default();
    };
    let Some(json) = first.trim().strip_prefix(META_HEADER) else {
        return LegacyMeta::default();
    };
    match serde_json::from_str(json.trim()) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("Ignoring malformed META header: {}", e);
            LegacyMeta::default()
        }
    }
}

fn legacy_module(lua: &Rc<Lua>, content: &str) -> mlua::Result<CompiledModule> {
    let meta = parse_meta_header(content);
    let Some(global) = meta.exports.clone().or_else(|| meta.metadata.name.clone()) else {
        return Ok(CompiledModule::without_exports(meta.metadata));
    };

    let ctor = lua.globals().get::<Value>(global)?;

    Ok(match factory(lua, ctor) {
        Some(f) => CompiledModule::new(meta.metadata, f),
        None => CompiledModule::without_exports(meta.metadata),
    })
}

/// Exported constructor of a Lua addon.
struct LuaFactory {
    lua: Rc<Lua>,
    ctor: Value,
}

impl LuaFactory {
    fn instantiate(&self) -> mlua::Result<Value> {
        match &self.ctor {
            Value::Function(f) => f.call::<Value>(()),
            Value::Table(cls) => match cls.get::<Value>("new")? {
                Value::Function(new) => new.call::<Value>(cls.clone()),
                _ => self.lua.load(INSTANTIATE_CLASS).call::<Value>(cls.clone()),
            },
            _ => Ok(Value::Nil),
        }
    }
}

impl AddonFactory for LuaFactory {
    fn construct(&self) -> Result<Box<dyn AddonInstance>, Fault> {
        match self.instantiate()? {
            Value::Table(table) => Ok(Box::new(LuaInstance {
                lua: Rc::clone(&self.lua),
                table,
            })),
            other => Err(Fault::new(format!(
                "constructor returned {} instead of a table",
                other.type_name()
            ))),
        }
    }
}

/// A constructed Lua addon object.
pub struct LuaInstance {
    lua: Rc<Lua>,
    table: Table,
}

impl LuaInstance {
    fn method(&self, name: &str) -> Option<Function> {
        match self.table.get::<Value>(name) {
            Ok(Value::Function(f)) => Some(f),
            _ => None,
        }
    }

    fn accessor(&self, name: &str) -> Result<Option<String>, Fault> {
        let Some(f) = self.method(name) else {
            return Ok(None);
        };
        match f.call::<Value>(self.table.clone())? {
            Value::String(s) => Ok(s.to_str().ok().map(|s| s.to_string())),
            _ => Ok(None),
        }
    }

    /// Reads a field of the instance table as JSON (`None` when nil).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match self.table.get::<Value>(name) {
            Ok(Value::Nil) | Err(_) => None,
            Ok(value) => self.lua.from_value(value).ok(),
        }
    }
}

impl AddonInstance for LuaInstance {
    fn has_hook(&self, hook: &Hook) -> bool {
        self.method(hook.method_name()).is_some()
    }

    fn call(&mut self, hook: &Hook, payload: Option<&serde_json::Value>) -> Result<(), Fault> {
        let Some(f) = self.method(hook.method_name()) else {
            return Ok(());
        };
        match payload {
            Some(payload) => {
                let arg = self.lua.to_value(payload)?;
                f.call::<()>((self.table.clone(), arg))?;
            }
            None => f.call::<()>(self.table.clone())?,
        }
        Ok(())
    }

    fn info(&self) -> Result<AddonMetadata, Fault> {
        Ok(AddonMetadata {
            name: self.accessor("get_name")?,
            author: self.accessor("get_author")?,
            description: self.accessor("get_description")?,
            version: self.accessor("get_version")?,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::lua_api::new_handle;
    use tempfile::TempDir;

    fn write_addon(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write addon");
        path
    }

    #[test]
    fn test_compile_returned_exports() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "foo.addon.lua",
            r#"
            local Foo = {}
            Foo.__index = Foo
            function Foo.new() return setmetatable({}, Foo) end
            function Foo:start() self.x = 1 end
            return { name = "Foo", version = "1.2.0", type = Foo }
            "#,
        );

        let loader = LuaLoader::new(new_handle());
        let module = loader.compile(&path).expect("compile");
        assert_eq!(module.metadata.name.as_deref(), Some("Foo"));
        assert_eq!(module.metadata.version.as_deref(), Some("1.2.0"));

        let factory = module.factory.expect("factory");
        let mut instance = factory.construct().expect("construct");
        assert!(instance.has_hook(&Hook::Start));
        assert!(!instance.has_hook(&Hook::Stop));

        instance.call(&Hook::Start, None).expect("start");
        let lua_instance = instance
            .as_any()
            .downcast_ref::<LuaInstance>()
            .expect("lua instance");
        assert_eq!(lua_instance.field("x"), Some(serde_json::json!(1)));
    }

    #[test]
    fn test_compile_module_exports_function() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "bar.addon.lua",
            r#"
            module.exports = function()
                return { stop = function(self) end }
            end
            "#,
        );

        let loader = LuaLoader::new(new_handle());
        let module = loader.compile(&path).expect("compile");
        assert!(module.metadata.name.is_none());
        let instance = module.factory.expect("factory").construct().expect("construct");
        assert!(instance.has_hook(&Hook::Stop));
    }

    #[test]
    fn test_compile_class_table_without_new() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "cls.addon.lua",
            r#"
            local Cls = {}
            function Cls:start() self.started = true end
            return Cls
            "#,
        );

        let loader = LuaLoader::new(new_handle());
        let module = loader.compile(&path).expect("compile");
        let mut instance = module.factory.expect("factory").construct().expect("construct");
        instance.call(&Hook::Start, None).expect("start");
        let lua_instance = instance.as_any().downcast_ref::<LuaInstance>().expect("lua");
        assert_eq!(lua_instance.field("started"), Some(serde_json::json!(true)));
    }

    #[test]
    fn test_compile_metadata_only_has_no_factory() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(&dir, "meta.addon.lua", r#"return { name = "Meta" }"#);

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        assert_eq!(module.metadata.name.as_deref(), Some("Meta"));
        assert!(module.factory.is_none());
    }

    #[test]
    fn test_compile_syntax_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(&dir, "broken.addon.lua", "return {");

        let err = LuaLoader::new(new_handle())
            .compile(&path)
            .err()
            .expect("syntax error");
        assert_eq!(err.filename, path);
        assert!(!err.fault.message.is_empty());
    }

    #[test]
    fn test_compile_top_level_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(&dir, "throws.addon.lua", r#"error("top level")"#);

        let err = LuaLoader::new(new_handle())
            .compile(&path)
            .err()
            .expect("runtime error");
        assert_eq!(err.fault.message, "top level");
    }

    #[test]
    fn test_compile_missing_file() {
        let dir = TempDir::new().expect("temp dir");
        let err = LuaLoader::new(new_handle())
            .compile(&dir.path().join("nope.addon.lua"))
            .err()
            .expect("io error");
        assert!(err.fault.message.starts_with("Failed to read file"));
    }

    #[test]
    fn test_legacy_global_by_meta_header() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "legacy.addon.lua",
            r#"-- META {"name": "Legacy", "author": "Old Timer", "exports": "LegacyAddon"}
            LegacyAddon = {}
            function LegacyAddon:start() end
            "#,
        );

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        assert_eq!(module.metadata.name.as_deref(), Some("Legacy"));
        assert_eq!(module.metadata.author.as_deref(), Some("Old Timer"));
        let instance = module.factory.expect("factory").construct().expect("construct");
        assert!(instance.has_hook(&Hook::Start));
    }

    #[test]
    fn test_legacy_global_found_by_meta_name() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "greeter.addon.lua",
            r#"-- META {"name": "Greeter"}
            Greeter = {}
            function Greeter:start() end
            "#,
        );

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        assert_eq!(module.metadata.name.as_deref(), Some("Greeter"));
        assert!(module.factory.is_some());
    }

    #[test]
    fn test_legacy_global_not_guessed_from_file_name() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "Greeter.addon.lua",
            r#"
            Greeter = {}
            function Greeter:start() end
            "#,
        );

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        assert!(module.factory.is_none());
    }

    #[test]
    fn test_legacy_without_header_has_no_exports() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(&dir, "plain.addon.lua", "local x = 1");

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        assert!(module.factory.is_none());
        assert_eq!(module.metadata, AddonMetadata::default());
    }

    #[test]
    fn test_instance_accessors() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "acc.addon.lua",
            r#"
            return {
                type = function()
                    return {
                        get_name = function(self) return "Accessor" end,
                        get_version = function(self) return "9.9" end,
                    }
                end
            }
            "#,
        );

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        let instance = module.factory.expect("factory").construct().expect("construct");
        let info = instance.info().expect("info");
        assert_eq!(info.name.as_deref(), Some("Accessor"));
        assert_eq!(info.version.as_deref(), Some("9.9"));
        assert!(info.author.is_none());
    }

    #[test]
    fn test_constructor_must_return_table() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(&dir, "num.addon.lua", "return { type = function() return 5 end }");

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        let err = module.factory.expect("factory").construct().err().expect("fault");
        assert!(err.message.contains("instead of a table"));
    }

    #[test]
    fn test_observer_receives_payload() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_addon(
            &dir,
            "obs.addon.lua",
            r#"
            return {
                type = function()
                    return { observer = function(self, m) self.last = m.target end }
                end
            }
            "#,
        );

        let module = LuaLoader::new(new_handle()).compile(&path).expect("compile");
        let mut instance = module.factory.expect("factory").construct().expect("construct");
        instance
            .call(&Hook::Observer, Some(&serde_json::json!({ "target": "#chat" })))
            .expect("observer");
        let lua_instance = instance.as_any().downcast_ref::<LuaInstance>().expect("lua");
        assert_eq!(lua_instance.field("last"), Some(serde_json::json!("#chat")));
    }
}
