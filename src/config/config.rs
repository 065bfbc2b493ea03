use crate::config::types::{PersonalityError, Result, DEFAULT_DEBUG_MAP_SIZE};
/// Configuration loading from jailcompat.json
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in personality held by the root container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootPersonalityConfig {
    pub osname: String,
    pub osrelease: String,
    pub oss_version: i32,
}

impl Default for RootPersonalityConfig {
    fn default() -> Self {
        Self {
            osname: "Linux".to_string(),
            osrelease: "2.6.16".to_string(),
            oss_version: 0x030600,
        }
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Personality of the root container
    #[serde(default)]
    pub root: RootPersonalityConfig,
    /// Upper bound on private records held by non-root containers
    #[serde(default)]
    pub max_records: Option<usize>,
    /// Number of operation ids in the debug toggle map
    #[serde(default = "default_debug_map_size")]
    pub debug_map_size: usize,
    /// Register the personality slot as soon as the registry is built
    #[serde(default = "default_true")]
    pub register_on_start: bool,
    /// Fail fast on validation errors instead of reporting them
    #[serde(default = "default_true")]
    pub strict_mode: bool,
}

fn default_debug_map_size() -> usize {
    DEFAULT_DEBUG_MAP_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: RootPersonalityConfig::default(),
            max_records: None,
            debug_map_size: DEFAULT_DEBUG_MAP_SIZE,
            register_on_start: true,
            strict_mode: true,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|e| PersonalityError::Config(format!("Failed to read config file: {}", e)))?;

        let config: RegistryConfig = serde_json::from_str(&config_content)
            .map_err(|e| PersonalityError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load default configuration from ./jailcompat.json
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| {
                PersonalityError::Config(format!("Failed to get current directory: {}", e))
            })?
            .join("jailcompat.json");

        if !config_path.exists() {
            return Err(PersonalityError::Config(
                "jailcompat.json not found in current directory".to_string(),
            ));
        }

        Self::load_from_file(config_path)
    }

    /// Load ./jailcompat.json if present, otherwise the built-in defaults
    pub fn load_or_default() -> Self {
        match Self::load_default() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using built-in registry defaults: {}", e);
                Self::default()
            }
        }
    }
}

/// One container in a hierarchy description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    /// Parent container name; the root when absent
    #[serde(default)]
    pub parent: Option<String>,
    /// Jail parameters in `key=value` form, e.g. `linux.osrelease=3.10.0`
    #[serde(default)]
    pub params: Vec<String>,
}

/// Hierarchy description consumed by the CLI
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HierarchyConfig {
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

impl HierarchyConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PersonalityError::Config(format!("Failed to read hierarchy file: {}", e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            PersonalityError::Config(format!("Failed to parse hierarchy JSON: {}", e))
        })
    }
}
