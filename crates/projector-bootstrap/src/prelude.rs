use std::rc::Rc;

use mlua::{Function, IntoLuaMulti, Value};
use tracing::{debug, info, warn};

use crate::bridge::{self, BridgeBinding};
use crate::cancellation::{Guarded, Region};
use crate::compiler::{LuaCompiler, ScriptCompiler};
use crate::engine::EngineHandle;
use crate::error::{BootstrapError, ContractViolation};
use crate::host::HostBindings;
use crate::script::UserScript;
use crate::slot::RegistrySlot;
use crate::template::EnvironmentTemplate;

/// Error report for the host, as produced after a non-success outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReport {
    /// Script execution was terminated
    Terminated,
    /// The last operation failed with this message
    Exception(String),
}

impl ErrorReport {
    /// Numeric code reported over the host boundary
    pub fn code(&self) -> u32 {
        match self {
            ErrorReport::Exception(_) => 1,
            ErrorReport::Terminated => 2,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ErrorReport::Exception(message) => Some(message),
            ErrorReport::Terminated => None,
        }
    }
}

/// Runs the prelude once per engine and builds environment templates from
/// the factory it returns.
///
/// Not reentrant: every operation takes `&mut self`, so calls into one
/// instance are serialized by the borrow checker.
pub struct PreludeScript {
    host: Rc<HostBindings>,
    compiler: Rc<dyn ScriptCompiler>,
    /// Compiled prelude chunk
    prelude: RegistrySlot,
    /// Template factory returned by the last successful prelude run
    factory: RegistrySlot,
    last_error: Option<String>,
    // Declared last so it is dropped after everything referencing it
    engine: EngineHandle,
}

impl PreludeScript {
    /// Bind `engine` to `host`, compiling scripts with [`LuaCompiler`]
    pub fn new(engine: EngineHandle, host: HostBindings) -> Self {
        Self::with_compiler(engine, host, LuaCompiler)
    }

    pub fn with_compiler(
        engine: EngineHandle,
        host: HostBindings,
        compiler: impl ScriptCompiler + 'static,
    ) -> Self {
        let host = Rc::new(host);
        let compiler: Rc<dyn ScriptCompiler> = Rc::new(compiler);

        bridge::bind(
            engine.lua(),
            BridgeBinding {
                instance: engine.instance_id(),
                host: host.clone(),
                compiler: compiler.clone(),
            },
        );

        Self {
            host,
            compiler,
            prelude: RegistrySlot::new(),
            factory: RegistrySlot::new(),
            last_error: None,
            engine,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Diagnostic left by the most recent failing operation
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_set()
    }

    /// Create the prelude context and compile the prelude into it.
    ///
    /// Any factory from an earlier run is released: it belongs to the old context.
    pub fn compile_script(&mut self, source: &str, file_name: &str) -> Result<(), BootstrapError> {
        let result = self.compile_prelude(source, file_name);
        self.record("compile", result)
    }

    /// Run the compiled prelude and keep the factory it returns
    pub fn try_run(&mut self) -> Result<(), BootstrapError> {
        let result = self.run_prelude();
        self.record("prelude", result)
    }

    /// Call the factory with `args` and copy its result into a new template
    pub fn get_template(
        &mut self,
        args: impl IntoLuaMulti,
    ) -> Result<EnvironmentTemplate, BootstrapError> {
        let result = self.build_template(args);
        self.record("template", result)
    }

    /// Compile a user script against a global table instantiated from `template`
    pub fn compile_user_script(
        &mut self,
        template: &EnvironmentTemplate,
        source: &str,
        name: &str,
    ) -> Result<UserScript, BootstrapError> {
        let result = self.compile_user(template, source, name);
        self.record("compile", result)
    }

    /// Run a compiled user script inside the cancellable region
    pub fn run_user_script(&mut self, script: &UserScript) -> Result<Value, BootstrapError> {
        let result = self.run_user(script);
        self.record(script.name(), result)
    }

    /// What the host should report after a non-success outcome, if anything.
    ///
    /// Only a pending [`TerminationHandle`](crate::TerminationHandle) request
    /// yields [`ErrorReport::Terminated`]. A cancellation decided by the guard
    /// leaves the last-error slot untouched, so after one this still returns
    /// the earlier operation's exception, which is not the cause of the
    /// cancellation. Hosts should act on `BootstrapError::Terminated` first.
    pub fn report_errors(&self) -> Option<ErrorReport> {
        if self.engine.termination().is_requested() {
            return Some(ErrorReport::Terminated);
        }
        self.last_error.clone().map(ErrorReport::Exception)
    }

    fn region(&self) -> Region<'_> {
        Region {
            guard: self.host.guard(),
            termination: self.engine.termination(),
            observer: self.host.observer(),
        }
    }

    /// Update the last-error slot from an operation's outcome.
    /// Termination leaves the slot as it was.
    fn record<T>(
        &mut self,
        operation: &str,
        result: Result<T, BootstrapError>,
    ) -> Result<T, BootstrapError> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(BootstrapError::Terminated) => {
                info!(target: "scripting", "{} terminated", operation);
            }
            Err(e) => {
                warn!(target: "scripting", "{} failed: {}", operation, e);
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    fn compile_prelude(&mut self, source: &str, file_name: &str) -> Result<(), BootstrapError> {
        let lua = self.engine.lua();
        self.factory.release(lua);
        self.prelude.release(lua);

        let context = bridge::create_context(lua, self.engine.instance_id())
            .map_err(BootstrapError::engine)?;
        let function = self.compiler.compile(lua, &context, source, file_name)?;
        self.prelude.store(lua, function)?;

        debug!(target: "scripting", "Compiled prelude '{}'", file_name);
        Ok(())
    }

    fn run_prelude(&mut self) -> Result<(), BootstrapError> {
        let lua = self.engine.lua();
        self.factory.release(lua);

        let prelude: Function = self
            .prelude
            .get(lua)?
            .ok_or(ContractViolation::PreludeNotCompiled)?;

        let value = match self.region().run("prelude", || prelude.call::<Value>(())) {
            Guarded::Terminated => return Err(BootstrapError::Terminated),
            Guarded::Completed(result) => result.map_err(|e| BootstrapError::script(&e))?,
        };

        let factory = match value {
            Value::Nil => return Err(ContractViolation::PreludeNoValue.into()),
            Value::Function(factory) => factory,
            _ => return Err(ContractViolation::PreludeNotCallable.into()),
        };

        self.factory.store(lua, factory)?;
        info!(target: "scripting", "Prelude returned a template factory");
        Ok(())
    }

    fn build_template(&self, args: impl IntoLuaMulti) -> Result<EnvironmentTemplate, BootstrapError> {
        let lua = self.engine.lua();
        let factory: Function = self
            .factory
            .get(lua)?
            .ok_or(ContractViolation::FactoryMissing)?;

        let value = match self.region().run("template", || factory.call::<Value>(args)) {
            Guarded::Terminated => return Err(BootstrapError::Terminated),
            Guarded::Completed(result) => result.map_err(|e| BootstrapError::script(&e))?,
        };

        let object = match value {
            Value::Nil => return Err(ContractViolation::FactoryNoValue.into()),
            Value::Table(object) => object,
            _ => return Err(ContractViolation::FactoryNotObject.into()),
        };

        let template = EnvironmentTemplate::from_object(&object)?;
        debug!(target: "scripting", "Built template with {} entries", template.len());
        Ok(template)
    }

    fn compile_user(
        &self,
        template: &EnvironmentTemplate,
        source: &str,
        name: &str,
    ) -> Result<UserScript, BootstrapError> {
        let lua = self.engine.lua();
        let global = template.instantiate(lua)?;
        let function = self.compiler.compile(lua, &global, source, name)?;
        UserScript::new(lua, self.engine.instance_id(), name, global, function)
    }

    fn run_user(&self, script: &UserScript) -> Result<Value, BootstrapError> {
        if script.instance() != self.engine.instance_id() {
            return Err(BootstrapError::Engine(format!(
                "script '{}' was compiled by {}",
                script.name(),
                script.instance()
            )));
        }

        let lua = self.engine.lua();
        let function = script.function(lua)?;

        match self.region().run(script.name(), || function.call::<Value>(())) {
            Guarded::Terminated => Err(BootstrapError::Terminated),
            Guarded::Completed(result) => result.map_err(|e| BootstrapError::script(&e)),
        }
    }
}

impl Drop for PreludeScript {
    fn drop(&mut self) {
        let lua = self.engine.lua();
        self.factory.release(lua);
        self.prelude.release(lua);
    }
}
