use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default number of VM instructions between termination checks
pub const DEFAULT_INSTRUCTION_INTERVAL: u32 = 1000;

/// Default diagnostic name for the prelude
pub const DEFAULT_PRELUDE_NAME: &str = "prelude";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found")]
    NotFound,
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("IO error reading config: {0}")]
    IoError(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub prelude: PreludeConfig,

    #[serde(default)]
    pub modules: ModulesConfig,

    /// Host-side execution policy (enforced by the host's guard, not the engine)
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on engine heap usage, unlimited when absent
    #[serde(default)]
    pub memory_limit_bytes: Option<usize>,

    /// VM instructions between checks for a forced termination (default: 1000)
    #[serde(default = "default_instruction_interval")]
    pub instruction_interval: u32,
}

fn default_instruction_interval() -> u32 {
    DEFAULT_INSTRUCTION_INTERVAL
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: None,
            instruction_interval: DEFAULT_INSTRUCTION_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreludeConfig {
    /// Prelude source file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Name the prelude is compiled under, used in diagnostics
    #[serde(default = "default_prelude_name")]
    pub name: String,
}

fn default_prelude_name() -> String {
    DEFAULT_PRELUDE_NAME.to_string()
}

impl Default for PreludeConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: default_prelude_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory holding `<name>.lua` modules (default: <data dir>/modules)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl ModulesConfig {
    /// Get the module directory path (use provided or default)
    pub fn module_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("modules"))
                .unwrap_or_else(|| PathBuf::from(".modules"))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock budget for one guarded operation, unlimited when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "projector")
}

impl BootstrapConfig {
    /// Default location of the config file
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigLoadError> {
        toml::from_str(content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        info!(target: "scripting", "Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the config file from its default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NotFound)?;
        Self::load_from(&path)
    }
}
