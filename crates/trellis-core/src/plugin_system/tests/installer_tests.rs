use tempfile::tempdir;

use crate::kernel::error::Error;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::installer::{FilePluginInstaller, PluginInstaller};
use crate::plugin_system::plugin::PluginArtifact;

#[tokio::test]
async fn test_install_copies_artifact_under_its_key() {
    let staging = tempdir().unwrap();
    let target = tempdir().unwrap();
    let source = staging.path().join("Upload-1234.JSON");
    std::fs::write(&source, b"{}").unwrap();

    let installer = FilePluginInstaller::new(target.path().join("plugins"));
    let installed = installer
        .install_plugin("com.example", &PluginArtifact::new(&source))
        .await
        .unwrap();

    assert_eq!(installed, target.path().join("plugins").join("com.example.json"));
    assert_eq!(std::fs::read(&installed).unwrap(), b"{}");
    // The source stays where it was.
    assert!(source.exists());
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

async fn install_each(installer: &FilePluginInstaller, staging: &std::path::Path, contents: &[&str]) {
    for content in contents {
        let source = staging.join("p.json");
        std::fs::write(&source, content).unwrap();
        installer.install_plugin("p", &PluginArtifact::new(&source)).await.unwrap();
    }
}

#[tokio::test]
async fn test_install_replaces_previous_copy() {
    let staging = tempdir().unwrap();
    let target = tempdir().unwrap();
    let installer = FilePluginInstaller::new(target.path());

    install_each(&installer, staging.path(), &["first", "second"]).await;

    assert_eq!(std::fs::read_to_string(target.path().join("p.json")).unwrap(), "second");
    assert_eq!(file_names(target.path()), vec![".p.json.previous", "p.json"]);

    installer.discard_backup("p").await.unwrap();
    assert_eq!(file_names(target.path()), vec!["p.json"], "no temp files may be left behind");
}

#[tokio::test]
async fn test_revert_restores_the_oldest_replaced_copy() {
    let staging = tempdir().unwrap();
    let target = tempdir().unwrap();
    let installer = FilePluginInstaller::new(target.path());

    install_each(&installer, staging.path(), &["first", "second", "third"]).await;
    assert!(installer.revert_installed_plugin("p").await.unwrap());

    assert_eq!(std::fs::read_to_string(target.path().join("p.json")).unwrap(), "first");
    assert_eq!(file_names(target.path()), vec!["p.json"]);
    // Nothing left to restore.
    assert!(!installer.revert_installed_plugin("p").await.unwrap());
}

#[tokio::test]
async fn test_revert_of_a_fresh_install_restores_nothing() {
    let staging = tempdir().unwrap();
    let target = tempdir().unwrap();
    let installer = FilePluginInstaller::new(target.path());

    install_each(&installer, staging.path(), &["first"]).await;

    assert!(!installer.revert_installed_plugin("p").await.unwrap());
    assert_eq!(std::fs::read_to_string(target.path().join("p.json")).unwrap(), "first");
}

#[tokio::test]
async fn test_clear_backups_removes_leftovers_of_earlier_runs() {
    let staging = tempdir().unwrap();
    let target = tempdir().unwrap();
    std::fs::write(target.path().join(".q.json.previous"), "stale").unwrap();
    std::fs::write(target.path().join(".notes"), "kept").unwrap();
    let installer = FilePluginInstaller::new(target.path());
    install_each(&installer, staging.path(), &["first", "second"]).await;

    installer.clear_backups().await.unwrap();

    assert_eq!(file_names(target.path()), vec![".notes", "p.json"]);
    assert!(!installer.revert_installed_plugin("p").await.unwrap());
    assert_eq!(std::fs::read_to_string(target.path().join("p.json")).unwrap(), "second");
}

#[tokio::test]
async fn test_clear_backups_of_a_missing_directory_is_a_no_op() {
    let target = tempdir().unwrap();
    let installer = FilePluginInstaller::new(target.path().join("missing"));
    installer.clear_backups().await.unwrap();
}

#[tokio::test]
async fn test_install_rejects_keys_that_escape_the_directory() {
    let staging = tempdir().unwrap();
    let source = staging.path().join("p.json");
    std::fs::write(&source, "{}").unwrap();
    let installer = FilePluginInstaller::new(staging.path().join("plugins"));

    for key in ["../evil", "a/b", ".hidden"] {
        match installer.install_plugin(key, &PluginArtifact::new(&source)).await {
            Err(Error::PluginSystem(PluginSystemError::InstallationError { plugin_key, .. })) => {
                assert_eq!(plugin_key, key)
            }
            other => panic!("Expected InstallationError for {:?}, got {:?}", key, other),
        }
    }
}

#[tokio::test]
async fn test_install_of_missing_artifact_is_an_io_error() {
    let target = tempdir().unwrap();
    let installer = FilePluginInstaller::new(target.path());
    let result = installer
        .install_plugin("p", &PluginArtifact::new(target.path().join("nope.json")))
        .await;
    assert!(matches!(result, Err(Error::StorageSystem(_))));
}
