use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::tempdir;

use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::storage::config::{ConfigFormat, ManagerConfig};
use crate::storage::error::StorageSystemError;

fn sample_config() -> ManagerConfig {
    ManagerConfig {
        plugin_directory: Some(PathBuf::from("/srv/app/plugins")),
        bundled_directory: Some(PathBuf::from("/usr/share/app/bundled")),
        state_file: PathBuf::from("/var/lib/app/state.json"),
        container_startup_timeout_ms: 1_500,
        dev_mode: false,
    }
}

#[test]
fn test_default_config_uses_constants() {
    let config = ManagerConfig::default();
    assert_eq!(config.plugin_directory, Some(PathBuf::from(constants::DEFAULT_PLUGINS_DIR)));
    assert_eq!(config.bundled_directory, None);
    assert_eq!(config.state_file, PathBuf::from(constants::DEFAULT_STATE_FILE));
    assert_eq!(
        config.container_startup_timeout(),
        Duration::from_millis(constants::DEFAULT_CONTAINER_STARTUP_TIMEOUT_MS)
    );
}

#[test]
fn test_dev_mode_doubles_startup_timeout() {
    let mut config = sample_config();
    assert_eq!(config.container_startup_timeout(), Duration::from_millis(1_500));
    config.dev_mode = true;
    assert_eq!(config.container_startup_timeout(), Duration::from_millis(3_000));
}

#[test]
fn test_format_from_path() {
    assert_eq!(ConfigFormat::from_path(Path::new("trellis.json")), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path(Path::new("TRELLIS.JSON")), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path(Path::new("trellis.ini")), None);
    assert_eq!(ConfigFormat::from_path(Path::new("trellis")), None);

    #[cfg(feature = "yaml-config")]
    {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), Some(ConfigFormat::Yaml));
    }
    #[cfg(feature = "toml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), Some(ConfigFormat::Toml));
}

#[test]
fn test_missing_fields_fall_back_to_defaults() -> Result<()> {
    let config = ManagerConfig::deserialize(r#"{ "dev_mode": true }"#, ConfigFormat::Json)?;
    assert!(config.dev_mode);
    assert_eq!(config.state_file, PathBuf::from(constants::DEFAULT_STATE_FILE));
    assert_eq!(
        config.container_startup_timeout_ms,
        constants::DEFAULT_CONTAINER_STARTUP_TIMEOUT_MS
    );
    Ok(())
}

#[test]
fn test_config_serialization() -> Result<()> {
    let config = sample_config();

    let json_str = config.serialize(ConfigFormat::Json)?;
    assert_eq!(ManagerConfig::deserialize(&json_str, ConfigFormat::Json)?, config);

    #[cfg(feature = "yaml-config")]
    {
        let yaml_str = config.serialize(ConfigFormat::Yaml)?;
        assert_eq!(ManagerConfig::deserialize(&yaml_str, ConfigFormat::Yaml)?, config);
    }

    #[cfg(feature = "toml-config")]
    {
        let toml_str = config.serialize(ConfigFormat::Toml)?;
        assert_eq!(ManagerConfig::deserialize(&toml_str, ConfigFormat::Toml)?, config);
    }

    Ok(())
}

#[test]
fn test_load_from_file() -> Result<()> {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("trellis.json");
    std::fs::write(&path, r#"{ "container_startup_timeout_ms": 250 }"#)
        .expect("Failed to write config file");

    let config = ManagerConfig::load(&path)?;
    assert_eq!(config.container_startup_timeout(), Duration::from_millis(250));
    Ok(())
}

#[test]
fn test_load_rejects_unknown_extension() {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("trellis.ini");
    std::fs::write(&path, "dev_mode = true").expect("Failed to write config file");

    match ManagerConfig::load(&path) {
        Err(Error::StorageSystem(StorageSystemError::UnsupportedConfigFormat(_))) => {}
        other => panic!("Expected UnsupportedConfigFormat, got {:?}", other),
    }
}

#[test]
fn test_load_reports_malformed_content() {
    let dir = tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("trellis.json");
    std::fs::write(&path, "{ not json").expect("Failed to write config file");

    match ManagerConfig::load(&path) {
        Err(Error::StorageSystem(StorageSystemError::DeserializationError { format, .. })) => {
            assert_eq!(format, "json");
        }
        other => panic!("Expected DeserializationError, got {:?}", other),
    }
}
