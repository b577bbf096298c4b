use std::sync::Arc;

use crate::kernel::error::Error;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{PluginLoader, StaticPluginLoader};
use crate::plugin_system::tests::common::{COMPONENT, Recorder, descriptor, module_factory};

#[tokio::test]
async fn test_static_plugins_are_fixed_and_permanent() {
    let factory = module_factory(&Arc::new(Recorder::default()));
    let loader = StaticPluginLoader::default()
        .with_descriptor(descriptor("a", "1.0", &[("m", COMPONENT)]))
        .with_descriptor(descriptor("b", "1.0", &[]));

    let plugins = loader.load_all_plugins(&factory).await.unwrap();
    assert_eq!(plugins.len(), 2);
    for plugin in &plugins {
        assert!(!plugin.is_dynamically_loaded());
        assert!(!plugin.is_uninstallable());
        assert!(!plugin.is_deletable());
        assert!(plugin.artifact().is_none());
    }

    assert!(!loader.supports_addition());
    assert!(loader.add_found_plugins(&factory).await.unwrap().is_empty());
    assert!(matches!(
        loader.remove_plugin(&plugins[0]).await,
        Err(Error::PluginSystem(PluginSystemError::RemovalNotSupported { .. }))
    ));
}

#[tokio::test]
async fn test_unknown_module_type_yields_an_unloadable_static_plugin() {
    let factory = module_factory(&Arc::new(Recorder::default()));
    let loader = StaticPluginLoader::new(vec![descriptor("a", "1.0", &[("m", "missing")])]);

    let plugins = loader.load_all_plugins(&factory).await.unwrap();
    assert_eq!(plugins.len(), 1);
    assert!(plugins[0].is_unloadable());
    assert!(!plugins[0].is_uninstallable());
}
