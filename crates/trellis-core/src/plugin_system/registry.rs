use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::plugin::Plugin;

/// A registered plugin together with the loader that provided it.
#[derive(Debug, Clone)]
pub struct RegisteredPlugin {
    pub plugin: Arc<Plugin>,
    pub loader: Arc<dyn PluginLoader>,
}

/// Registry for managing plugins
///
/// Owns every registered [`Plugin`] and remembers registration order, which
/// breaks ties in startup ordering.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, RegisteredPlugin>,
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin`, replacing any plugin with the same key in place.
    /// Returns the replaced entry.
    pub fn register(&mut self, plugin: Arc<Plugin>, loader: Arc<dyn PluginLoader>) -> Option<RegisteredPlugin> {
        let key = plugin.key().to_string();
        let previous = self.plugins.insert(key.clone(), RegisteredPlugin { plugin, loader });
        if previous.is_none() {
            self.order.push(key);
        }
        previous
    }

    /// Swaps the plugin object for `key`, keeping its loader and position.
    pub fn replace_plugin(&mut self, plugin: Arc<Plugin>) -> Option<Arc<Plugin>> {
        let entry = self.plugins.get_mut(plugin.key())?;
        Some(std::mem::replace(&mut entry.plugin, plugin))
    }

    pub fn unregister(&mut self, key: &str) -> Option<RegisteredPlugin> {
        let removed = self.plugins.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn has_plugin(&self, key: &str) -> bool {
        self.plugins.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredPlugin> {
        self.plugins.get(key)
    }

    pub fn get_plugin(&self, key: &str) -> Option<Arc<Plugin>> {
        self.plugins.get(key).map(|entry| Arc::clone(&entry.plugin))
    }

    /// Plugins in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<Plugin>> {
        self.order
            .iter()
            .filter_map(|key| self.plugins.get(key))
            .map(|entry| &entry.plugin)
    }

    pub fn keys(&self) -> &[String] {
        &self.order
    }

    /// Keys of the registered plugins that directly require `key`, in registration order.
    pub fn direct_dependents(&self, key: &str) -> Vec<String> {
        self.plugins()
            .filter(|plugin| plugin.required_plugins().contains(key))
            .map(|plugin| plugin.key().to_string())
            .collect()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
        self.order.clear();
    }
}
