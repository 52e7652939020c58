//! Module resolution requested by scripts through `load_module`
//!
//! The bridge sends the host a [`ModuleRequest`] holding its own copy of the
//! requested name and gets back either a [`ModuleHandle`] or nothing. Handles
//! point into the host's module cache; this layer only reads the module's
//! exposed value from them.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::{Lua, RegistryKey, Value};
use tracing::{debug, info, warn};

use crate::bridge;
use crate::compiler::ScriptCompiler;
use crate::engine::InstanceId;
use crate::error::BootstrapError;

/// Resolves a module name to a loaded module
pub trait ModuleResolver {
    fn resolve(&self, request: ModuleRequest<'_>) -> Option<ModuleHandle>;
}

impl<F> ModuleResolver for F
where
    F: Fn(ModuleRequest<'_>) -> Option<ModuleHandle>,
{
    fn resolve(&self, request: ModuleRequest<'_>) -> Option<ModuleHandle> {
        self(request)
    }
}

/// Resolver for hosts that expose no modules
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&self, request: ModuleRequest<'_>) -> Option<ModuleHandle> {
        debug!(target: "scripting", "No module resolver configured for '{}'", request.name());
        None
    }
}

/// A loaded module, owned by the host's module cache
pub struct ModuleScript {
    name: String,
    instance: InstanceId,
    object: RegistryKey,
}

impl fmt::Debug for ModuleScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScript")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Opaque, cheaply cloned reference to a loaded module
#[derive(Debug, Clone)]
pub struct ModuleHandle(Rc<ModuleScript>);

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Engine instance the module was compiled in
    pub fn instance(&self) -> InstanceId {
        self.0.instance
    }

    /// The value scripts receive from `load_module`
    pub fn module_object(&self, lua: &Lua) -> Result<Value, BootstrapError> {
        lua.registry_value::<Value>(&self.0.object)
            .map_err(BootstrapError::engine)
    }

    pub fn ptr_eq(&self, other: &ModuleHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Capability to compile module source inside the requesting engine
pub struct ModuleCompiler<'a> {
    lua: &'a Lua,
    compiler: &'a dyn ScriptCompiler,
    instance: InstanceId,
}

impl<'a> ModuleCompiler<'a> {
    pub(crate) fn new(lua: &'a Lua, compiler: &'a dyn ScriptCompiler, instance: InstanceId) -> Self {
        Self {
            lua,
            compiler,
            instance,
        }
    }

    /// Compile and run a module in a context of its own.
    ///
    /// The module's exposed value is whatever the chunk returns, or its
    /// context table when it returns nothing.
    pub fn compile_module(&self, name: &str, source: &str) -> Result<ModuleHandle, BootstrapError> {
        let context =
            bridge::create_context(self.lua, self.instance).map_err(BootstrapError::engine)?;
        let function = self.compiler.compile(self.lua, &context, source, name)?;

        let returned = function
            .call::<Value>(())
            .map_err(|e| BootstrapError::script(&e))?;
        let object = match returned {
            Value::Nil => Value::Table(context),
            value => value,
        };

        let object = self
            .lua
            .create_registry_value(object)
            .map_err(BootstrapError::engine)?;

        debug!(target: "scripting", "Compiled module '{}'", name);
        Ok(ModuleHandle(Rc::new(ModuleScript {
            name: name.to_string(),
            instance: self.instance,
            object,
        })))
    }
}

/// A script's request for a module, sent to the host
pub struct ModuleRequest<'a> {
    name: String,
    compiler: ModuleCompiler<'a>,
}

impl<'a> ModuleRequest<'a> {
    pub(crate) fn new(name: String, compiler: ModuleCompiler<'a>) -> Self {
        Self { name, compiler }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile `source` as the requested module
    pub fn compile(&self, source: &str) -> Result<ModuleHandle, BootstrapError> {
        self.compiler.compile_module(&self.name, source)
    }
}

/// Where a host finds module source text
pub trait ModuleSource {
    fn source(&self, name: &str) -> Option<String>;
}

impl ModuleSource for HashMap<String, String> {
    fn source(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Reads `<dir>/<name>.lua`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_module_name(name) {
            return None;
        }
        Some(self.dir.join(format!("{name}.lua")))
    }
}

impl ModuleSource for DirectorySource {
    fn source(&self, name: &str) -> Option<String> {
        let Some(path) = self.path_for(name) else {
            warn!(target: "scripting", "Rejected module name '{}'", name);
            return None;
        };

        match fs::read_to_string(&path) {
            Ok(source) => Some(source),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(target: "scripting", "Module '{}' not found at {}", name, path.display());
                None
            }
            Err(e) => {
                warn!(
                    target: "scripting",
                    "Failed to read module '{}' from {}: {}",
                    name,
                    path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Module names map onto file names; keep them to a safe alphabet
fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Memoizing resolver: each module is compiled once per resolver and the
/// same handle is returned for every later request of that name
pub struct CachingModuleResolver<S> {
    source: S,
    cache: RefCell<HashMap<String, ModuleHandle>>,
    loading: RefCell<HashSet<String>>,
}

impl<S: ModuleSource> CachingModuleResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(HashSet::new()),
        }
    }

    /// Number of modules compiled so far
    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl<S: ModuleSource> ModuleResolver for CachingModuleResolver<S> {
    fn resolve(&self, request: ModuleRequest<'_>) -> Option<ModuleHandle> {
        let name = request.name().to_string();

        if let Some(handle) = self.cache.borrow().get(&name) {
            return Some(handle.clone());
        }

        // A module that is still compiling asked for itself, directly or not
        if !self.loading.borrow_mut().insert(name.clone()) {
            warn!(target: "scripting", "Circular reference to module '{}'", name);
            return None;
        }

        let compiled = self
            .source
            .source(&name)
            .map(|source| request.compile(&source));
        self.loading.borrow_mut().remove(&name);

        match compiled {
            Some(Ok(handle)) => {
                info!(target: "scripting", "Loaded module '{}'", name);
                self.cache.borrow_mut().insert(name, handle.clone());
                Some(handle)
            }
            Some(Err(e)) => {
                warn!(target: "scripting", "Failed to load module '{}': {}", name, e);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::LuaCompiler;

    fn request<'a>(lua: &'a Lua, instance: InstanceId, name: &str) -> ModuleRequest<'a> {
        ModuleRequest::new(name.to_string(), ModuleCompiler::new(lua, &LuaCompiler, instance))
    }

    #[test]
    fn test_caching_resolver_returns_same_handle() {
        let lua = Lua::new();
        let instance = InstanceId::next();
        let mut sources = HashMap::new();
        sources.insert("helpers".to_string(), "return { answer = 42 }".to_string());
        let resolver = CachingModuleResolver::new(sources);

        let first = resolver.resolve(request(&lua, instance, "helpers")).unwrap();
        let second = resolver.resolve(request(&lua, instance, "helpers")).unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(first.name(), "helpers");
        assert_eq!(first.instance(), instance);
        assert_eq!(resolver.cached_count(), 1);
        assert!(resolver.resolve(request(&lua, instance, "missing")).is_none());

        let Value::Table(object) = first.module_object(&lua).unwrap() else {
            panic!("module should expose a table");
        };
        assert_eq!(object.get::<i64>("answer").unwrap(), 42);
    }

    #[test]
    fn test_module_names() {
        assert!(is_valid_module_name("projections"));
        assert!(is_valid_module_name("1Prelude.Modules"));
        assert!(is_valid_module_name("event-helpers_v2"));
        assert!(!is_valid_module_name(""));
        assert!(!is_valid_module_name("../secrets"));
        assert!(!is_valid_module_name("nested/module"));
        assert!(!is_valid_module_name("C:\\modules"));
    }

    #[test]
    fn test_directory_source_rejects_traversal() {
        let source = DirectorySource::new("/tmp");
        assert!(source.path_for("..").is_none());
        assert_eq!(
            source.path_for("helpers"),
            Some(PathBuf::from("/tmp/helpers.lua"))
        );
    }

    #[test]
    fn test_map_source() {
        let mut sources = HashMap::new();
        sources.insert("helpers".to_string(), "return {}".to_string());

        assert_eq!(sources.source("helpers").as_deref(), Some("return {}"));
        assert!(sources.source("missing").is_none());
    }
}
