//! # Trellis Core Plugin System Errors
//!
//! [`PluginSystemError`] is the primary enum for failures raised while
//! loading, installing, enabling, disabling or removing plugins and their
//! modules. [`PluginSystemErrorSource`] wraps the lower-level causes
//! (I/O, JSON) attached to loading failures.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Duplicate plugin found (installed version is the same or older) and could not be unloaded: '{key}'")]
    DuplicatePlugin { key: String },

    #[error("Plugin loading failed for '{plugin_key}': {source}")]
    LoadingError {
        plugin_key: String,
        path: Option<PathBuf>,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("Plugin descriptor error in '{artifact}': {message}")]
    DescriptorError {
        artifact: String,
        message: String,
    },

    #[error("Unknown module type '{module_type}' for module '{module_key}'")]
    UnknownModuleType {
        module_key: String,
        module_type: String,
    },

    #[error("Module '{module_key}' failed: {message}")]
    ModuleError {
        module_key: String,
        message: String,
    },

    #[error("Plugin not found: '{0}'")]
    PluginNotFound(String),

    #[error("Plugin module not found: '{0}'")]
    ModuleNotFound(String),

    #[error("Plugin '{plugin_key}' could not be loaded: {reason}")]
    Unloadable {
        plugin_key: String,
        reason: String,
    },

    #[error("Plugin '{plugin_key}' requires '{dependency}', which is not installed or cannot be enabled")]
    MissingDependency {
        plugin_key: String,
        dependency: String,
    },

    #[error("Plugin '{plugin_key}' cannot be removed by loader '{loader}'")]
    RemovalNotSupported {
        plugin_key: String,
        loader: String,
    },

    #[error("Plugin '{0}' is not uninstallable")]
    NotUninstallable(String),

    #[error("Artifact '{artifact}' cannot be installed: {message}")]
    InvalidArtifact {
        artifact: String,
        message: String,
    },

    #[error("Plugin installation error for '{plugin_key}': {message}")]
    InstallationError {
        plugin_key: String,
        message: String,
    },

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemErrorSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Other: {0}")]
    Other(String),
}
