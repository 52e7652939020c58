use std::collections::HashSet;

use mlua::{Lua, Table, Value};
use tracing::debug;

use crate::error::BootstrapError;

/// Name → value mapping a script's global scope is built from.
///
/// Built fresh by every template factory call and never mutated afterwards.
/// Entry order follows the engine's table traversal, which is stable for a
/// given engine build but carries no meaning.
#[derive(Debug, Clone)]
pub struct EnvironmentTemplate {
    entries: Vec<(String, Value)>,
}

impl EnvironmentTemplate {
    /// Copy every own property of `object` into a new template
    pub(crate) fn from_object(object: &Table) -> Result<Self, BootstrapError> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        object
            .for_each(|key: Value, value: Value| {
                match property_name(&key) {
                    Some(name) if seen.insert(name.clone()) => entries.push((name, value)),
                    Some(name) => {
                        debug!(target: "scripting", "Skipping duplicate template property '{}'", name)
                    }
                    None => {
                        debug!(target: "scripting", "Skipping template property with {} key", key.type_name())
                    }
                }
                Ok(())
            })
            .map_err(|e| BootstrapError::script(&e))?;

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Build a new global table for a user script from this template.
    ///
    /// Template entries shadow the engine's standard globals, which stay
    /// reachable through the table's metatable.
    pub fn instantiate(&self, lua: &Lua) -> Result<Table, BootstrapError> {
        let build = || -> mlua::Result<Table> {
            let global = lua.create_table()?;
            for (name, value) in &self.entries {
                global.raw_set(name.as_str(), value.clone())?;
            }

            let metatable = lua.create_table()?;
            metatable.set("__index", lua.globals())?;
            global.set_metatable(Some(metatable));
            Ok(global)
        };

        build().map_err(BootstrapError::engine)
    }
}

/// Text a property key is copied under; `None` for keys with no text form
fn property_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.to_string_lossy().into()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_string_and_numeric_keys() {
        let lua = Lua::new();
        let object: Table = lua
            .load("return { name = 'orders', [1] = 'first', [true] = 'ignored' }")
            .eval()
            .unwrap();

        let template = EnvironmentTemplate::from_object(&object).unwrap();

        assert_eq!(template.len(), 2);
        assert!(template.get("name").is_some());
        assert!(template.get("1").is_some());
        assert!(template.get("true").is_none());
    }

    #[test]
    fn test_instantiate_shadows_globals() {
        let lua = Lua::new();
        let object: Table = lua
            .load("return { print = 'shadowed', stream = 'orders' }")
            .eval()
            .unwrap();
        let template = EnvironmentTemplate::from_object(&object).unwrap();

        let global = template.instantiate(&lua).unwrap();
        let result: String = lua
            .load("return print .. ':' .. stream .. ':' .. type(string.upper)")
            .set_environment(global)
            .eval()
            .unwrap();

        assert_eq!(result, "shadowed:orders:function");
    }

    #[test]
    fn test_empty_object() {
        let lua = Lua::new();
        let object = lua.create_table().unwrap();

        let template = EnvironmentTemplate::from_object(&object).unwrap();

        assert!(template.is_empty());
        assert_eq!(template.names().count(), 0);
    }
}
