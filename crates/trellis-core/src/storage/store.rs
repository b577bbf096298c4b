use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;

use crate::kernel::error::Result;
use crate::storage::error::StorageSystemError;
use crate::storage::state::PersistedState;

/// Durable home of the [`PersistedState`].
#[async_trait]
pub trait PersistentStateStore: Send + Sync + Debug {
    async fn load(&self) -> Result<PersistedState>;

    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Keeps the state in memory only; used by tests and embedded setups.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Current snapshot without going through the async trait.
    pub fn snapshot(&self) -> PersistedState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PersistentStateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

/// Stores the state as pretty-printed JSON in a single file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistentStateStore for JsonFileStateStore {
    async fn load(&self) -> Result<PersistedState> {
        let exists = fs::try_exists(&self.path)
            .await
            .map_err(|e| StorageSystemError::io(e, "try_exists", self.path.clone()))?;
        if !exists {
            log::debug!("No persisted plugin state at {}, starting from defaults", self.path.display());
            return Ok(PersistedState::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| StorageSystemError::io(e, "read_state", self.path.clone()))?;
        if content.trim().is_empty() {
            return Ok(PersistedState::new());
        }
        let state: PersistedState = serde_json::from_str(&content).map_err(|e| {
            StorageSystemError::DeserializationError {
                format: "json".to_string(),
                source: Box::new(e),
            }
        })?;
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            StorageSystemError::SerializationError {
                format: "json".to_string(),
                source: Box::new(e),
            }
        })?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.clone()))?;

        let mut temp = NamedTempFile::new_in(&parent)
            .map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.clone()))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| StorageSystemError::io(e, "write_temp_file", temp.path().to_path_buf()))?;
        temp.persist(&self.path)
            .map_err(|e| StorageSystemError::io(e.error, "persist_state", self.path.clone()))?;
        Ok(())
    }
}
