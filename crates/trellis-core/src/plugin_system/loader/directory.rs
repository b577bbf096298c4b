use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReadDirStream;

use crate::kernel::error::{Error, Result};
use crate::plugin_system::descriptor::ModuleDescriptorFactory;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{
    ArtifactFactory, ArtifactIdentity, DynamicPluginLoader, JsonDescriptorFactory, PluginLoader,
};
use crate::plugin_system::plugin::{Plugin, PluginArtifact};
use crate::plugin_system::version::PluginVersion;

/// File identity used to tell whether an artifact changed between scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug, Clone)]
struct ScannedArtifact {
    stamp: FileStamp,
    /// Key and version the artifact was loaded as; `None` if no factory recognized it.
    plugin: Option<(String, PluginVersion)>,
}

/// Loads plugins from the files of a single directory (not recursive).
///
/// Hidden files are ignored, which also keeps in-progress installs (written to
/// a dot-prefixed temp file, then renamed) out of a scan.
pub struct DirectoryPluginLoader {
    name: String,
    directory: PathBuf,
    factories: Vec<Arc<dyn ArtifactFactory>>,
    removable: bool,
    snapshot: Mutex<HashMap<PathBuf, ScannedArtifact>>,
}

impl std::fmt::Debug for DirectoryPluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryPluginLoader")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .field("factories", &self.factories)
            .field("removable", &self.removable)
            .finish_non_exhaustive()
    }
}

impl DirectoryPluginLoader {
    /// Hot-deploy loader for `directory` recognizing JSON descriptors.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            name: "directory".to_string(),
            directory: directory.into(),
            factories: vec![Arc::new(JsonDescriptorFactory::new())],
            removable: true,
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the factory chain; order is priority.
    pub fn with_factories(mut self, factories: Vec<Arc<dyn ArtifactFactory>>) -> Self {
        self.factories = factories;
        self
    }

    /// Loaded plugins can be neither deleted nor uninstalled, and nothing is ever removed.
    pub(crate) fn read_only(mut self) -> Self {
        self.removable = false;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn list_artifacts(&self) -> Result<Vec<(PathBuf, FileStamp)>> {
        let exists = fs::try_exists(&self.directory)
            .await
            .map_err(|e| Error::io(e, "try_exists", self.directory.clone()))?;
        if !exists {
            log::debug!("Plugin directory {} does not exist, nothing to load", self.directory.display());
            return Ok(Vec::new());
        }

        let read_dir = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::io(e, "read_dir", self.directory.clone()))?;
        let mut entries = ReadDirStream::new(read_dir);
        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry.map_err(|e| Error::io(e, "read_dir_entry", self.directory.clone()))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!("Failed to get metadata for {}: {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let stamp = FileStamp {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            };
            artifacts.push((path, stamp));
        }
        artifacts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(artifacts)
    }

    async fn translate(&self, path: &Path, factory: &ModuleDescriptorFactory) -> std::io::Result<Option<Plugin>> {
        let content = fs::read(path).await?;
        let artifact = PluginArtifact::new(path);
        let plugin = self
            .factories
            .iter()
            .find_map(|f| f.recognize(&artifact, &content, factory))
            .map(|plugin| plugin.with_removal(self.removable, self.removable));
        Ok(plugin)
    }

    async fn scan(&self, factory: &ModuleDescriptorFactory, only_changed: bool) -> Result<Vec<Plugin>> {
        let artifacts = self.list_artifacts().await?;
        let mut snapshot = self.snapshot.lock().await;
        if !only_changed {
            snapshot.clear();
        }
        let present: HashSet<&PathBuf> = artifacts.iter().map(|(path, _)| path).collect();
        snapshot.retain(|path, _| present.contains(path));

        let mut found = Vec::new();
        for (path, stamp) in &artifacts {
            if snapshot.get(path).is_some_and(|known| known.stamp == *stamp) {
                continue;
            }
            match self.translate(path, factory).await {
                Ok(Some(plugin)) => {
                    log::debug!("Loader '{}' found plugin '{}' in {}", self.name, plugin.key(), path.display());
                    let identity = (plugin.key().to_string(), plugin.version().clone());
                    snapshot.insert(path.clone(), ScannedArtifact { stamp: *stamp, plugin: Some(identity) });
                    found.push(plugin);
                }
                Ok(None) => {
                    log::debug!("No factory recognizes {}, skipping", path.display());
                    snapshot.insert(path.clone(), ScannedArtifact { stamp: *stamp, plugin: None });
                }
                Err(e) => {
                    // Not recorded, so the next scan tries again.
                    log::warn!("Failed to read plugin artifact {}: {}", path.display(), e);
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl PluginLoader for DirectoryPluginLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_all_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>> {
        self.scan(factory, false).await
    }

    async fn add_found_plugins(&self, factory: &ModuleDescriptorFactory) -> Result<Vec<Plugin>> {
        self.scan(factory, true).await
    }

    fn supports_addition(&self) -> bool {
        true
    }

    fn supports_removal(&self) -> bool {
        self.removable
    }

    async fn remove_plugin(&self, plugin: &Plugin) -> Result<()> {
        if !self.removable {
            return Err(PluginSystemError::RemovalNotSupported {
                plugin_key: plugin.key().to_string(),
                loader: self.name.clone(),
            }
            .into());
        }
        let Some(artifact) = plugin.artifact() else {
            log::debug!("Plugin '{}' has no artifact, nothing to delete", plugin.key());
            return Ok(());
        };
        if !plugin.is_deletable() {
            log::debug!("Plugin '{}' is not deletable, keeping {}", plugin.key(), artifact);
            return Ok(());
        }

        let mut snapshot = self.snapshot.lock().await;
        if let Some(known) = snapshot.get(artifact.path()) {
            let same = known
                .plugin
                .as_ref()
                .is_some_and(|(key, version)| key == plugin.key() && version == plugin.version());
            if !same {
                log::info!(
                    "Not deleting {}: it now holds a different plugin than '{}' {}",
                    artifact,
                    plugin.key(),
                    plugin.version()
                );
                return Ok(());
            }
        } else if !artifact.path().starts_with(&self.directory) {
            log::debug!("{} is outside {}, not deleting", artifact, self.directory.display());
            return Ok(());
        }

        match fs::remove_file(artifact.path()).await {
            Ok(()) => log::info!("Deleted plugin artifact {}", artifact),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(e, "remove_file", artifact.path().to_path_buf())),
        }
        snapshot.remove(artifact.path());
        Ok(())
    }

    fn as_dynamic(&self) -> Option<&dyn DynamicPluginLoader> {
        if self.removable { Some(self as &dyn DynamicPluginLoader) } else { None }
    }
}

#[async_trait]
impl DynamicPluginLoader for DirectoryPluginLoader {
    async fn can_load(&self, artifact: &PluginArtifact) -> Result<Option<ArtifactIdentity>> {
        let content = fs::read(artifact.path())
            .await
            .map_err(|e| Error::io(e, "read_artifact", artifact.path().to_path_buf()))?;
        match self.factories.iter().find_map(|f| f.identify(artifact, &content)) {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }
}
