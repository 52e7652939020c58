//! Prelude bootstrap and module resolution for projection scripts
//!
//! A privileged prelude script runs once per engine and returns a template
//! factory. Each user script then gets an environment built by calling that
//! factory. Every call into script code goes through the host's cancellable
//! region, and scripts reach back into the host only through `log` and
//! `load_module`.
//!
//! ```no_run
//! use projector_bootstrap::{EngineConfig, EngineHandle, HostBindings, PreludeScript, TerminationHandle};
//!
//! # fn main() -> Result<(), projector_bootstrap::BootstrapError> {
//! let engine = EngineHandle::new(&EngineConfig::default(), TerminationHandle::new())?;
//! let mut prelude = PreludeScript::new(engine, HostBindings::default());
//!
//! prelude.compile_script("return function(stream) return { stream = stream } end", "prelude")?;
//! prelude.try_run()?;
//! let template = prelude.get_template("orders")?;
//! assert_eq!(template.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cancellation;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod modules;
pub mod prelude;
pub mod script;
mod slot;
pub mod template;

pub use bridge::{LOAD_MODULE_FUNCTION, LOG_FUNCTION};
pub use cancellation::{
    AllowAll, CancellationGuard, FnGuard, TerminationHandle, TerminationObserver,
};
pub use compiler::{LuaCompiler, ScriptCompiler};
pub use config::{BootstrapConfig, ConfigLoadError, EngineConfig};
pub use engine::{EngineHandle, InstanceId};
pub use error::{render_script_error, BootstrapError, CompileError, ContractViolation, Status};
pub use host::{HostBindings, HostBindingsBuilder, LogHandler, TracingLog};
pub use modules::{
    CachingModuleResolver, DirectorySource, ModuleCompiler, ModuleHandle, ModuleRequest,
    ModuleResolver, ModuleSource, NoModules,
};
pub use prelude::{ErrorReport, PreludeScript};
pub use script::UserScript;
pub use template::EnvironmentTemplate;

// Engine types appear throughout the public API
pub use mlua;
