//! # Plugin Loaders
//!
//! A [`PluginLoader`] turns some source of plugins (code, a hot-deploy
//! directory, a bundled directory) into [`Plugin`] values for the manager.
//! Directory-backed loaders translate files through an ordered chain of
//! [`ArtifactFactory`] implementations; the first factory that recognizes an
//! artifact wins.
use std::fmt;

use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::plugin_system::descriptor::ModuleDescriptorFactory;
use crate::plugin_system::plugin::{Plugin, PluginArtifact};
use crate::plugin_system::version::PluginVersion;

pub mod bundled;
pub mod directory;
pub mod json;
pub mod static_loader;

pub use bundled::BundledPluginLoader;
pub use directory::DirectoryPluginLoader;
pub use json::JsonDescriptorFactory;
pub use static_loader::StaticPluginLoader;

#[async_trait]
pub trait PluginLoader: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Every plugin this loader currently provides. Malformed artifacts come
    /// back as unloadable placeholders instead of failing the batch.
    async fn load_all_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>>;

    /// Only plugins whose artifacts are new or changed since the previous
    /// load or scan. Empty when nothing changed.
    async fn add_found_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>>;

    fn supports_addition(&self) -> bool;

    fn supports_removal(&self) -> bool;

    async fn remove_plugin(&self, plugin: &Plugin) -> Result<()>;

    /// Loaders that accept artifacts for installation.
    fn as_dynamic(&self) -> Option<&dyn DynamicPluginLoader> {
        None
    }
}

/// Key and version an artifact declares, read without building the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    pub key: String,
    pub version: PluginVersion,
}

#[async_trait]
pub trait DynamicPluginLoader: Send + Sync {
    /// What the artifact would be installed as; `None` if this loader does not
    /// recognize it, an error if it recognizes but cannot load it.
    async fn can_load(&self, artifact: &PluginArtifact) -> Result<Option<ArtifactIdentity>>;
}

/// Translates one artifact into a plugin.
pub trait ArtifactFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// `None` when the artifact is not this factory's format. A recognized
    /// but broken artifact yields an unloadable plugin.
    fn recognize(
        &self,
        artifact: &PluginArtifact,
        content: &[u8],
        factory: &ModuleDescriptorFactory,
    ) -> Option<Plugin>;

    /// Validates the artifact without resolving module types.
    fn identify(&self, artifact: &PluginArtifact, content: &[u8]) -> Option<Result<ArtifactIdentity>>;
}

// Test module declaration
#[cfg(test)]
mod tests;
