use mlua::{FromLua, IntoLua, Lua, RegistryKey};
use tracing::debug;

use crate::error::BootstrapError;

/// Single-owner slot for a long-lived engine reference.
///
/// Replacement and teardown both go through [`RegistrySlot::release`], so a
/// previous value is always released before a new one is stored.
#[derive(Debug, Default)]
pub(crate) struct RegistrySlot {
    key: Option<RegistryKey>,
}

impl RegistrySlot {
    pub fn new() -> Self {
        Self { key: None }
    }

    pub fn is_set(&self) -> bool {
        self.key.is_some()
    }

    /// Release the held reference, if any
    pub fn release(&mut self, lua: &Lua) {
        if let Some(key) = self.key.take() {
            // A key from another engine only leaks its entry
            if let Err(e) = lua.remove_registry_value(key) {
                debug!(target: "scripting", "Failed to release registry value: {}", e);
            }
        }
    }

    /// Release the previous reference, then hold `value`
    pub fn store(&mut self, lua: &Lua, value: impl IntoLua) -> Result<(), BootstrapError> {
        self.release(lua);
        let key = lua
            .create_registry_value(value)
            .map_err(BootstrapError::engine)?;
        self.key = Some(key);
        Ok(())
    }

    pub fn get<T: FromLua>(&self, lua: &Lua) -> Result<Option<T>, BootstrapError> {
        match &self.key {
            Some(key) => lua
                .registry_value::<T>(key)
                .map(Some)
                .map_err(BootstrapError::engine),
            None => Ok(None),
        }
    }
}
