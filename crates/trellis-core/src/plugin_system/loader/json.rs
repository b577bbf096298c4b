use crate::kernel::error::Result;
use crate::plugin_system::descriptor::ModuleDescriptorFactory;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{ArtifactFactory, ArtifactIdentity};
use crate::plugin_system::plugin::{Plugin, PluginArtifact, PluginDescriptor};
use crate::plugin_system::version::PluginVersion;

/// Recognizes `*.json` files holding a [`PluginDescriptor`].
#[derive(Debug, Default, Clone)]
pub struct JsonDescriptorFactory;

impl JsonDescriptorFactory {
    pub fn new() -> Self {
        Self
    }

    fn handles(artifact: &PluginArtifact) -> bool {
        artifact.extension().as_deref() == Some("json")
    }

    fn parse(artifact: &PluginArtifact, content: &[u8]) -> std::result::Result<PluginDescriptor, String> {
        let descriptor: PluginDescriptor =
            serde_json::from_slice(content).map_err(|e| format!("invalid plugin descriptor: {}", e))?;
        descriptor.validate()?;
        log::trace!("Parsed descriptor '{}' from {}", descriptor.key, artifact);
        Ok(descriptor)
    }

    /// Key to file a broken descriptor under: its `key` field if readable.
    fn best_effort_key(artifact: &PluginArtifact, content: &[u8]) -> String {
        serde_json::from_slice::<serde_json::Value>(content)
            .ok()
            .and_then(|value| value.get("key").and_then(|k| k.as_str()).map(str::to_string))
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| artifact.file_name())
    }
}

impl ArtifactFactory for JsonDescriptorFactory {
    fn name(&self) -> &str {
        "json-descriptor"
    }

    fn recognize(
        &self,
        artifact: &PluginArtifact,
        content: &[u8],
        factory: &ModuleDescriptorFactory,
    ) -> Option<Plugin> {
        if !Self::handles(artifact) {
            return None;
        }
        let plugin = match Self::parse(artifact, content) {
            Ok(descriptor) => match descriptor.build(factory, Some(artifact.clone())) {
                Ok(plugin) => plugin,
                Err(e) => Plugin::unloadable(descriptor.key.clone(), e.to_string(), Some(artifact.clone())),
            },
            Err(reason) => {
                let key = Self::best_effort_key(artifact, content);
                log::warn!("Artifact {} is not a loadable plugin: {}", artifact, reason);
                Plugin::unloadable(key, reason, Some(artifact.clone()))
            }
        };
        Some(plugin)
    }

    fn identify(&self, artifact: &PluginArtifact, content: &[u8]) -> Option<Result<ArtifactIdentity>> {
        if !Self::handles(artifact) {
            return None;
        }
        let result = Self::parse(artifact, content)
            .map(|descriptor| ArtifactIdentity {
                version: PluginVersion::new(descriptor.version),
                key: descriptor.key,
            })
            .map_err(|message| {
                PluginSystemError::InvalidArtifact {
                    artifact: artifact.file_name(),
                    message,
                }
                .into()
            });
        Some(result)
    }
}
