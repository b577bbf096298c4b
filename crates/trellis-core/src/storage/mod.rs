//! # Trellis Core Storage
//!
//! Persistence for the plugin framework: the administratively set
//! [`PersistedState`] (enable overrides and pending restart markers), the
//! [`PersistentStateStore`] implementations that keep it, and the
//! [`ManagerConfig`] read at startup.
pub mod config;
pub mod error;
pub mod state;
pub mod store;

pub use config::{ConfigFormat, ManagerConfig};
pub use error::StorageSystemError;
pub use state::{PersistedState, PersistedStateBuilder, RestartState, StateEntity};
pub use store::{JsonFileStateStore, MemoryStateStore, PersistentStateStore};

// Test module declaration
#[cfg(test)]
mod tests;
