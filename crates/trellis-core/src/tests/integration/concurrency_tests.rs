use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;

use crate::event::types::{PluginDisabledEvent, PluginEnabledEvent};
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::plugin::{PluginArtifact, PluginState};

use super::common::{Layout, service_factory, service_plugin, write_plugin};

#[tokio::test]
async fn test_queries_answer_while_an_install_waits_for_its_container() {
    let layout = Layout::new();
    let mut slow = service_plugin("slow", "1.0", "zzz");
    slow.startup_delay_ms = Some(300);
    let artifact = write_plugin(&layout.staging(), &slow);

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();

    let artifacts = [PluginArtifact::new(&artifact)];
    let install = manager.install_plugins(&artifacts);
    let observe = async {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if let Some(plugin) = manager.get_plugin("slow").unwrap() {
                if plugin.state() == PluginState::Enabling {
                    assert!(!manager.is_plugin_enabled("slow").unwrap());
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    };
    let (installed, saw_enabling) = tokio::join!(install, observe);

    assert_eq!(installed.unwrap(), vec!["slow".to_string()]);
    assert!(saw_enabling, "the plugin should be observable while its container starts");
    assert!(manager.is_plugin_enabled("slow").unwrap());
}

#[tokio::test]
async fn test_concurrent_toggles_are_serialized() {
    let layout = Layout::new();
    let keys: Vec<String> = (0..8).map(|i| format!("p{}", i)).collect();
    for key in &keys {
        write_plugin(&layout.installed(), &service_plugin(key, "1.0", key));
    }

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();

    let toggles = Arc::new(Mutex::new(Vec::new()));
    {
        let toggles = Arc::clone(&toggles);
        manager.events().subscribe::<PluginDisabledEvent, _>(move |event| {
            toggles.lock().unwrap().push(format!("-{}", event.plugin_key));
            Ok(())
        });
    }
    {
        let toggles = Arc::clone(&toggles);
        manager.events().subscribe::<PluginEnabledEvent, _>(move |event| {
            toggles.lock().unwrap().push(format!("+{}", event.plugin_key));
            Ok(())
        });
    }

    let results = join_all(keys.iter().map(|key| manager.disable_plugin(key))).await;
    assert!(results.iter().all(Result::is_ok));
    assert!(manager.get_enabled_plugins().is_empty());

    let results = join_all(keys.iter().map(|key| manager.enable_plugin(key))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(manager.get_enabled_plugins().len(), keys.len());

    let toggles = toggles.lock().unwrap();
    assert_eq!(toggles.len(), keys.len() * 2);
    assert_eq!(toggles.iter().filter(|t| t.starts_with('-')).count(), keys.len());
}
