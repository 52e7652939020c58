use std::fmt;

use mlua::{Function, Lua, RegistryKey, Table};

use crate::engine::InstanceId;
use crate::error::BootstrapError;

/// A user script compiled against a global table instantiated from a template
pub struct UserScript {
    name: String,
    instance: InstanceId,
    global: RegistryKey,
    function: RegistryKey,
}

impl UserScript {
    pub(crate) fn new(
        lua: &Lua,
        instance: InstanceId,
        name: &str,
        global: Table,
        function: Function,
    ) -> Result<Self, BootstrapError> {
        Ok(Self {
            name: name.to_string(),
            instance,
            global: lua
                .create_registry_value(global)
                .map_err(BootstrapError::engine)?,
            function: lua
                .create_registry_value(function)
                .map_err(BootstrapError::engine)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The script's global table, as left by its last run
    pub fn global(&self, lua: &Lua) -> Result<Table, BootstrapError> {
        lua.registry_value::<Table>(&self.global)
            .map_err(BootstrapError::engine)
    }

    pub(crate) fn function(&self, lua: &Lua) -> Result<Function, BootstrapError> {
        lua.registry_value::<Function>(&self.function)
            .map_err(BootstrapError::engine)
    }
}

impl fmt::Debug for UserScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserScript")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .finish()
    }
}
