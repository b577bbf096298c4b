use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::storage::error::StorageSystemError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Settings handed to the plugin manager and its loaders at construction.
///
/// Replaces process-wide switches: everything that tunes discovery, state
/// persistence or install timing lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory scanned for hot-deployable plugins (and the install target).
    pub plugin_directory: Option<PathBuf>,
    /// Read-only directory of plugins shipped with the application.
    pub bundled_directory: Option<PathBuf>,
    /// Where the persisted enable/disable overrides live.
    pub state_file: PathBuf,
    /// How long an install waits for a plugin container to come up.
    pub container_startup_timeout_ms: u64,
    /// Development mode; doubles the container startup timeout.
    pub dev_mode: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugin_directory: Some(PathBuf::from(constants::DEFAULT_PLUGINS_DIR)),
            bundled_directory: None,
            state_file: PathBuf::from(constants::DEFAULT_STATE_FILE),
            container_startup_timeout_ms: constants::DEFAULT_CONTAINER_STARTUP_TIMEOUT_MS,
            dev_mode: false,
        }
    }
}

impl ManagerConfig {
    pub fn container_startup_timeout(&self) -> Duration {
        let base = Duration::from_millis(self.container_startup_timeout_ms);
        if self.dev_mode { base * 2 } else { base }
    }

    /// Load a configuration file, picking the parser from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(path.display().to_string())
        })?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageSystemError::io(e, "read_config", path.to_path_buf()))?;
        let config = Self::deserialize(&content, format)?;
        log::debug!("Loaded manager configuration from {}", path.display());
        Ok(config)
    }

    /// Deserialize from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self> {
        let parsed: Self = match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| {
                StorageSystemError::DeserializationError { format: "json".into(), source: Box::new(e) }
            })?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| {
                StorageSystemError::DeserializationError { format: "yaml".into(), source: Box::new(e) }
            })?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| {
                StorageSystemError::DeserializationError { format: "toml".into(), source: Box::new(e) }
            })?,
        };
        Ok(parsed)
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String> {
        let text = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                StorageSystemError::SerializationError { format: "json".into(), source: Box::new(e) }
            })?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| {
                StorageSystemError::SerializationError { format: "yaml".into(), source: Box::new(e) }
            })?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| {
                StorageSystemError::SerializationError { format: "toml".into(), source: Box::new(e) }
            })?,
        };
        Ok(text)
    }
}
