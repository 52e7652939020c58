//! Script-visible functions that call back into the host
//!
//! Each function is created for one engine instance and carries that
//! instance's id. On every call it looks up the typed binding stored in the
//! engine's app data and refuses to run if the ids disagree.
//!
//! The native side never raises. It answers `true, ...` or `false, message`
//! and a small Lua wrapper turns the failure into a plain string error, so
//! scripts that catch it see exactly the message below.

use std::rc::Rc;

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table, Value, Variadic};
use tracing::warn;

use crate::compiler::ScriptCompiler;
use crate::engine::InstanceId;
use crate::error::render_script_error;
use crate::host::HostBindings;
use crate::modules::{ModuleCompiler, ModuleRequest};

/// Global name of the logging function
pub const LOG_FUNCTION: &str = "log";

/// Global name of the module loading function
pub const LOAD_MODULE_FUNCTION: &str = "load_module";

/// Raised for every module that cannot be provided, whatever the cause
pub(crate) const CANNOT_LOAD_MODULE: &str = "Cannot load module";

const WRAPPER: &str = r#"
local native = ...
local error = error

local function check(ok, ...)
    if not ok then
        error((...), 0)
    end
    return ...
end

return function(...)
    return check(native(...))
end
"#;

/// Ties an engine instance to the host callbacks serving it
pub(crate) struct BridgeBinding {
    pub instance: InstanceId,
    pub host: Rc<HostBindings>,
    pub compiler: Rc<dyn ScriptCompiler>,
}

/// Attach `binding` to the engine it names
pub(crate) fn bind(lua: &Lua, binding: BridgeBinding) {
    lua.set_app_data(binding);
}

/// Create a fresh context table exposing the bridge functions, with the
/// engine's standard globals reachable through its metatable
pub(crate) fn create_context(lua: &Lua, instance: InstanceId) -> mlua::Result<Table> {
    let native_log = lua.create_function(move |lua, args: Variadic<Value>| {
        reply(lua, log(lua, instance, &args))
    })?;
    let native_load = lua.create_function(move |lua, args: Variadic<Value>| {
        reply(lua, load_module(lua, instance, &args))
    })?;

    let context = lua.create_table()?;
    context.set(LOG_FUNCTION, wrap(lua, native_log)?)?;
    context.set(LOAD_MODULE_FUNCTION, wrap(lua, native_load)?)?;

    let metatable = lua.create_table()?;
    metatable.set("__index", lua.globals())?;
    context.set_metatable(Some(metatable));

    Ok(context)
}

/// Script-facing function raising the native side's failure message as-is
fn wrap(lua: &Lua, native: Function) -> mlua::Result<Function> {
    lua.load(WRAPPER).set_name("=bridge").call(native)
}

/// `true, value` for success, `false, message` for failure
fn reply(lua: &Lua, outcome: Result<Option<Value>, String>) -> mlua::Result<MultiValue> {
    match outcome {
        Ok(None) => (true,).into_lua_multi(lua),
        Ok(Some(value)) => (true, value).into_lua_multi(lua),
        Err(message) => (false, message).into_lua_multi(lua),
    }
}

fn binding(lua: &Lua, instance: InstanceId) -> Result<(Rc<HostBindings>, Rc<dyn ScriptCompiler>), String> {
    let binding = lua
        .app_data_ref::<BridgeBinding>()
        .ok_or_else(|| format!("No host bridge is bound to {instance}"))?;

    if binding.instance != instance {
        return Err(format!(
            "Host bridge for {} was called from {}",
            binding.instance, instance
        ));
    }

    Ok((binding.host.clone(), binding.compiler.clone()))
}

/// Enforce the arity and non-emptiness every bridge function requires
fn single_argument<'a>(handler: &str, args: &'a [Value]) -> Result<&'a Value, String> {
    let [argument] = args else {
        return Err(format!("The '{handler}' handler expects 1 argument"));
    };

    if is_empty(argument) {
        return Err(format!("The '{handler}' handler argument cannot be empty"));
    }

    Ok(argument)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Nil => true,
        Value::String(s) => s.as_bytes().is_empty(),
        _ => false,
    }
}

fn to_text(lua: &Lua, value: &Value) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().into()),
        other => {
            let tostring: Function = lua.globals().get("tostring")?;
            tostring.call::<String>(other.clone())
        }
    }
}

fn log(lua: &Lua, instance: InstanceId, args: &[Value]) -> Result<Option<Value>, String> {
    let (host, _) = binding(lua, instance)?;
    let message = single_argument(LOG_FUNCTION, args)?;
    let text = to_text(lua, message).map_err(|e| render_script_error(&e))?;
    host.log(&text);
    Ok(None)
}

fn load_module(lua: &Lua, instance: InstanceId, args: &[Value]) -> Result<Option<Value>, String> {
    let (host, compiler) = binding(lua, instance)?;
    let argument = single_argument(LOAD_MODULE_FUNCTION, args)?;
    let Value::String(name) = argument else {
        return Err(format!(
            "The '{LOAD_MODULE_FUNCTION}' handler argument must be a string"
        ));
    };

    // The host gets its own copy; nothing it owns flows back but the handle
    let name: String = name.to_string_lossy().into();
    let request = ModuleRequest::new(
        name.clone(),
        ModuleCompiler::new(lua, compiler.as_ref(), instance),
    );

    let Some(module) = host.resolve_module(request) else {
        return Err(CANNOT_LOAD_MODULE.to_string());
    };

    if module.instance() != instance {
        warn!(
            target: "scripting",
            "Module '{}' belongs to {}, requested from {}",
            name,
            module.instance(),
            instance
        );
        return Err(CANNOT_LOAD_MODULE.to_string());
    }

    match module.module_object(lua) {
        Ok(object) => Ok(Some(object)),
        Err(e) => {
            warn!(target: "scripting", "Module '{}' has no usable value: {}", name, e);
            Err(CANNOT_LOAD_MODULE.to_string())
        }
    }
}
