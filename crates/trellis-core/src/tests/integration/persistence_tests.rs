use crate::kernel::error::Error;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::plugin::PluginArtifact;
use crate::storage::store::{JsonFileStateStore, PersistentStateStore};

use super::common::{Layout, service_factory, service_plugin, write_plugin};

#[tokio::test]
async fn test_admin_changes_survive_a_new_manager() {
    let layout = Layout::new();
    write_plugin(&layout.bundled(), &service_plugin("core", "1.0", "hi"));
    write_plugin(&layout.installed(), &service_plugin("extra", "1.0", "hey").requiring("core"));

    let first = PluginManager::from_config(layout.config(), service_factory());
    first.init().await.unwrap();
    assert!(first.is_plugin_enabled("core").unwrap());
    assert!(first.is_plugin_enabled("extra").unwrap());

    first.disable_plugin_module("extra:svc").await.unwrap();
    first.disable_plugin("core").await.unwrap();
    assert!(!first.is_plugin_enabled("extra").unwrap());
    first.shutdown().await.unwrap();

    let stored = JsonFileStateStore::new(layout.config().state_file).load().await.unwrap();
    assert_eq!(stored.overrides().get("core"), Some(&false));
    assert_eq!(stored.overrides().get("extra"), Some(&false));
    assert_eq!(stored.overrides().get("extra:svc"), Some(&false));

    let second = PluginManager::from_config(layout.config(), service_factory());
    second.init().await.unwrap();
    assert_eq!(second.plugin_count(), 2);
    assert!(!second.is_plugin_enabled("core").unwrap());
    assert!(!second.is_plugin_enabled("extra").unwrap());

    second.enable_plugin("extra").await.unwrap();
    assert!(second.is_plugin_enabled("core").unwrap());
    assert!(second.is_plugin_enabled("extra").unwrap());
    assert!(!second.is_plugin_module_enabled("extra:svc").unwrap());
    assert!(second.is_plugin_module_enabled("core:svc").unwrap());
}

#[tokio::test]
async fn test_bundled_plugin_cannot_be_uninstalled() {
    let layout = Layout::new();
    let file = write_plugin(&layout.bundled(), &service_plugin("core", "1.0", "hi"));

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();

    match manager.uninstall("core").await {
        Err(Error::PluginSystem(PluginSystemError::RemovalNotSupported { plugin_key, loader })) => {
            assert_eq!(plugin_key, "core");
            assert_eq!(loader, "bundled");
        }
        other => panic!("Expected RemovalNotSupported, got {:?}", other),
    }
    assert!(file.exists());
    assert!(manager.is_plugin_enabled("core").unwrap());
}

#[tokio::test]
async fn test_hot_deployed_upgrade_shadows_bundled_plugin() {
    let layout = Layout::new();
    let bundled = write_plugin(&layout.bundled(), &service_plugin("core", "1.0", "old"));
    let installed = write_plugin(&layout.installed(), &service_plugin("core", "2.0", "new"));

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();

    let core = manager.get_enabled_plugin("core").unwrap().unwrap();
    assert_eq!(core.version().as_str(), "2.0");
    assert!(core.is_uninstallable());
    assert!(bundled.exists(), "bundled artifacts are never deleted");

    manager.uninstall("core").await.unwrap();
    assert!(!installed.exists());
    assert!(manager.get_plugin("core").unwrap().is_none());
    manager.shutdown().await.unwrap();

    // The bundled copy comes back on the next start.
    manager.init().await.unwrap();
    let core = manager.get_enabled_plugin("core").unwrap().unwrap();
    assert_eq!(core.version().as_str(), "1.0");
}

#[tokio::test]
async fn test_installed_plugin_is_picked_up_after_restart() {
    let layout = Layout::new();
    let staging = layout.staging();
    let artifact = write_plugin(&staging, &service_plugin("late", "0.1", "yo"));

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();
    assert_eq!(manager.plugin_count(), 0);

    let keys = manager.install_plugins(&[PluginArtifact::new(&artifact)]).await.unwrap();
    assert_eq!(keys, vec!["late".to_string()]);
    assert!(layout.installed().join("late.json").exists());
    manager.disable_plugin("late").await.unwrap();

    let restarted = PluginManager::from_config(layout.config(), service_factory());
    restarted.init().await.unwrap();
    let late = restarted.get_plugin("late").unwrap().unwrap();
    assert!(!late.is_enabled());
}
