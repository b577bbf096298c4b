//! # Trellis Core Kernel Errors
//!
//! Defines the crate-wide error type.
//!
//! [`Error`] aggregates the typed errors of every subsystem (plugin system,
//! storage, events) and adds the lifecycle violations raised by the
//! [`StateTracker`](crate::kernel::lifecycle::StateTracker).
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::event::error::EventSystemError;
use crate::kernel::lifecycle::ManagerState;
use crate::plugin_system::error::PluginSystemError;
use crate::storage::error::StorageSystemError;

/// Custom error type for the Trellis plugin framework
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Specific, typed storage system error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// A lifecycle call arrived while the manager was in a state that does not allow it.
    #[error("Illegal state: cannot move from {current:?} to {requested:?}")]
    IllegalState {
        current: ManagerState,
        requested: ManagerState,
    },

    /// A caller passed an argument the API refuses outright (e.g. an empty key).
    #[error("Invalid argument '{argument}': {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

// Helper to create IoError with context, wraps StorageSystemError::Io
impl Error {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    /// Rejects empty plugin or module keys before any lookup happens.
    pub(crate) fn require_key(argument: &'static str, key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::InvalidArgument {
                argument,
                message: "key must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the plugin system error wrapped by this error, if any.
    pub fn as_plugin_error(&self) -> Option<&PluginSystemError> {
        match self {
            Error::PluginSystem(e) => Some(e),
            _ => None,
        }
    }
}
