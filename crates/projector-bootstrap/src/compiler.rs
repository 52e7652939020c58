use mlua::{Function, Lua, Table};

use crate::error::{render_script_error, CompileError};

/// Turns source text into an invocable function bound to a context
pub trait ScriptCompiler {
    /// Compile `source` so that it runs with `environment` as its global table.
    /// `name` is used only in diagnostics.
    fn compile(
        &self,
        lua: &Lua,
        environment: &Table,
        source: &str,
        name: &str,
    ) -> Result<Function, CompileError>;
}

/// Compiles Lua chunks with the engine's own loader
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaCompiler;

impl ScriptCompiler for LuaCompiler {
    fn compile(
        &self,
        lua: &Lua,
        environment: &Table,
        source: &str,
        name: &str,
    ) -> Result<Function, CompileError> {
        lua.load(source)
            .set_name(format!("={name}"))
            .set_environment(environment.clone())
            .into_function()
            .map_err(|e| CompileError {
                name: name.to_string(),
                message: render_script_error(&e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_chunk_uses_environment() {
        let lua = Lua::new();
        let env = lua.create_table().unwrap();
        env.set("answer", 42).unwrap();

        let function = LuaCompiler
            .compile(&lua, &env, "return answer", "answer")
            .unwrap();

        assert_eq!(function.call::<i64>(()).unwrap(), 42);
    }

    #[test]
    fn test_syntax_error_names_the_source() {
        let lua = Lua::new();
        let env = lua.create_table().unwrap();

        let err = LuaCompiler
            .compile(&lua, &env, "return function(", "broken")
            .unwrap_err();

        assert_eq!(err.name, "broken");
        assert!(err.message.starts_with("broken:"), "{}", err.message);
    }
}
