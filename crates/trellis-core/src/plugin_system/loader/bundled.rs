use std::path::PathBuf;

use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::plugin_system::descriptor::ModuleDescriptorFactory;
use crate::plugin_system::loader::{DirectoryPluginLoader, PluginLoader};
use crate::plugin_system::plugin::Plugin;

/// Plugins shipped with the application in a read-only directory.
///
/// Loaded once at startup; they cannot be deleted or uninstalled, only
/// replaced by a newer version from another loader.
#[derive(Debug)]
pub struct BundledPluginLoader {
    inner: DirectoryPluginLoader,
}

impl BundledPluginLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            inner: DirectoryPluginLoader::new(directory).with_name("bundled").read_only(),
        }
    }
}

#[async_trait]
impl PluginLoader for BundledPluginLoader {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn load_all_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>> {
        self.inner.load_all_plugins(factory).await
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
        self.inner.remove_plugin(plugin).await
    }
}
