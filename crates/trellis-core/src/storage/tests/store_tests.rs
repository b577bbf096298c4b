use tempfile::tempdir;

use crate::kernel::error::{Error, Result};
use crate::storage::error::StorageSystemError;
use crate::storage::state::{PersistedState, RestartState};
use crate::storage::store::{JsonFileStateStore, MemoryStateStore, PersistentStateStore};

fn sample_state() -> PersistedState {
    let mut builder = PersistedState::builder();
    builder
        .set_enabled("com.example.alpha", true, false)
        .set_enabled("com.example.alpha:web", false, true)
        .set_restart_state("com.example.beta", RestartState::Install);
    builder.to_state()
}

#[tokio::test]
async fn test_memory_store_round_trip() -> Result<()> {
    let store = MemoryStateStore::new();
    assert!(store.load().await?.is_empty());

    store.save(&sample_state()).await?;
    assert_eq!(store.load().await?, sample_state());
    assert_eq!(store.snapshot(), sample_state());
    Ok(())
}

#[tokio::test]
async fn test_json_store_missing_file_is_empty_state() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp directory");
    let store = JsonFileStateStore::new(dir.path().join("state.json"));
    assert!(store.load().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_json_store_persists_across_instances() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("nested").join("state.json");

    JsonFileStateStore::new(&path).save(&sample_state()).await?;
    assert!(path.exists());

    let reopened = JsonFileStateStore::new(&path);
    assert_eq!(reopened.load().await?, sample_state());
    Ok(())
}

#[tokio::test]
async fn test_json_store_overwrites_previous_state() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp directory");
    let store = JsonFileStateStore::new(dir.path().join("state.json"));

    store.save(&sample_state()).await?;
    store.save(&PersistedState::new()).await?;
    assert!(store.load().await?.is_empty());

    // No temp files are left next to the state file.
    let entries = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert_eq!(entries, 1);
    Ok(())
}

#[tokio::test]
async fn test_json_store_rejects_corrupt_file() {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("state.json");
    std::fs::write(&path, "[1, 2").expect("write corrupt state");

    match JsonFileStateStore::new(&path).load().await {
        Err(Error::StorageSystem(StorageSystemError::DeserializationError { .. })) => {}
        other => panic!("Expected DeserializationError, got {:?}", other),
    }
}
