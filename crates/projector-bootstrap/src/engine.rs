use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{HookTriggers, Lua, VmState};
use tracing::debug;

use crate::cancellation::{TerminationHandle, TERMINATION_MESSAGE};
use crate::config::EngineConfig;
use crate::error::BootstrapError;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one engine instance; bridge callbacks carry it to find their owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

/// Owns one scripting engine instance for the whole bootstrap lifetime
pub struct EngineHandle {
    lua: Lua,
    instance: InstanceId,
    termination: TerminationHandle,
}

impl EngineHandle {
    /// Create a configured engine whose running code can be stopped through `termination`
    pub fn new(config: &EngineConfig, termination: TerminationHandle) -> Result<Self, BootstrapError> {
        let lua = Lua::new();

        if let Some(limit) = config.memory_limit_bytes {
            lua.set_memory_limit(limit).map_err(BootstrapError::engine)?;
        }

        // Poll for forced termination while script code runs
        let requested = termination.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(config.instruction_interval.max(1)),
            move |_lua, _debug| {
                if requested.is_requested() {
                    return Err(mlua::Error::RuntimeError(TERMINATION_MESSAGE.to_string()));
                }
                Ok(VmState::Continue)
            },
        );

        let instance = InstanceId::next();
        debug!(target: "scripting", "Engine {} initialized", instance);

        Ok(Self {
            lua,
            instance,
            termination,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// Handle the host can use to stop script code running in this engine
    pub fn termination_handle(&self) -> TerminationHandle {
        self.termination.clone()
    }

    pub(crate) fn termination(&self) -> &TerminationHandle {
        &self.termination
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        debug!(target: "scripting", "Engine {} released", self.instance);
    }
}
