use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::plugin_system::descriptor::ModuleDescriptorFactory;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::plugin::{Plugin, PluginDescriptor};

/// Plugins compiled into the application, described in code.
///
/// The set is fixed: nothing is added after startup and nothing can be removed.
#[derive(Debug, Default)]
pub struct StaticPluginLoader {
    descriptors: Vec<PluginDescriptor>,
}

impl StaticPluginLoader {
    pub fn new(descriptors: Vec<PluginDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn with_descriptor(mut self, descriptor: PluginDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    fn name(&self) -> &str {
        "static"
    }

    async fn load_all_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>> {
        let plugins = self
            .descriptors
            .iter()
            .map(|descriptor| match descriptor.build(factory, None) {
                Ok(plugin) => plugin.with_removal(false, false),
                Err(e) => {
                    log::warn!("Static plugin '{}' cannot be loaded: {}", descriptor.key, e);
                    Plugin::unloadable(descriptor.key.clone(), e.to_string(), None).with_removal(false, false)
                }
            })
            .collect();
        Ok(plugins)
    }

    async fn add_found_plugins(&self, _factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>> {
        Ok(Vec::new())
    }

    fn supports_addition(&self) -> bool {
        false
    }

    fn supports_removal(&self) -> bool {
        false
    }

    async fn remove_plugin(&self, plugin: &Plugin) -> Result<()> {
        Err(PluginSystemError::RemovalNotSupported {
            plugin_key: plugin.key().to_string(),
            loader: self.name().to_string(),
        }
        .into())
    }
}
