use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;

use crate::kernel::error::{Error, Result};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::PluginArtifact;

/// Copies accepted artifacts to where a dynamic loader will pick them up.
#[async_trait]
pub trait PluginInstaller: Send + Sync + std::fmt::Debug {
    /// Returns the installed location.
    async fn install_plugin(&self, key: &str, artifact: &PluginArtifact) -> Result<PathBuf>;

    /// Puts back what installing `key` replaced. `Ok(false)` when there is nothing to restore.
    async fn revert_installed_plugin(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    /// Makes the install of `key` final.
    async fn discard_backup(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Makes every install final, including leftovers of a previous run.
    async fn clear_backups(&self) -> Result<()> {
        Ok(())
    }
}

const BACKUP_SUFFIX: &str = ".previous";

#[derive(Debug, Clone)]
struct Backup {
    target: PathBuf,
    backup: PathBuf,
}

/// Installs into a directory as `<key>.<ext>`, replacing any previous copy.
///
/// The bytes go to a hidden temp file in the target directory first and are
/// renamed into place, so a concurrent scan sees either the old or the new file.
/// A replaced copy is kept as a hidden `.<file>.previous` until the install is
/// made final or reverted. Repeated installs keep the oldest copy.
#[derive(Debug)]
pub struct FilePluginInstaller {
    directory: PathBuf,
    backups: Mutex<HashMap<String, Backup>>,
}

impl FilePluginInstaller {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            backups: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn target_for(&self, key: &str, artifact: &PluginArtifact) -> PathBuf {
        let file_name = match artifact.extension() {
            Some(ext) => format!("{}.{}", key, ext),
            None => key.to_string(),
        };
        self.directory.join(file_name)
    }

    fn backup_for(target: &Path) -> PathBuf {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{}{}", file_name, BACKUP_SUFFIX))
    }

    fn backups(&self) -> MutexGuard<'_, HashMap<String, Backup>> {
        self.backups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the current copy at `target` aside unless `key` already has a backup.
    async fn back_up(&self, key: &str, target: &Path) -> Result<()> {
        if self.backups().get(key).is_some_and(|b| b.target == target) {
            return Ok(());
        }
        let exists = fs::try_exists(target)
            .await
            .map_err(|e| Error::io(e, "try_exists", target.to_path_buf()))?;
        if !exists {
            return Ok(());
        }
        let backup = Self::backup_for(target);
        fs::rename(target, &backup)
            .await
            .map_err(|e| Error::io(e, "backup_artifact", target.to_path_buf()))?;
        log::debug!("Kept previous copy of '{}' as {}", key, backup.display());
        self.backups().insert(
            key.to_string(),
            Backup {
                target: target.to_path_buf(),
                backup,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl PluginInstaller for FilePluginInstaller {
    async fn install_plugin(&self, key: &str, artifact: &PluginArtifact) -> Result<PathBuf> {
        if key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(PluginSystemError::InstallationError {
                plugin_key: key.to_string(),
                message: "key cannot be used as a file name".to_string(),
            }
            .into());
        }
        let content = fs::read(artifact.path())
            .await
            .map_err(|e| Error::io(e, "read_artifact", artifact.path().to_path_buf()))?;
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| Error::io(e, "create_dir_all", self.directory.clone()))?;

        let target = self.target_for(key, artifact);
        let mut temp = NamedTempFile::new_in(&self.directory)
            .map_err(|e| Error::io(e, "create_temp_file", self.directory.clone()))?;
        temp.write_all(&content)
            .map_err(|e| Error::io(e, "write_temp_file", temp.path().to_path_buf()))?;
        self.back_up(key, &target).await?;
        temp.persist(&target)
            .map_err(|e| Error::io(e.error, "persist_artifact", target.clone()))?;

        log::info!("Installed plugin '{}' from {} to {}", key, artifact, target.display());
        Ok(target)
    }

    async fn revert_installed_plugin(&self, key: &str) -> Result<bool> {
        let Some(Backup { target, backup }) = self.backups().remove(key) else {
            return Ok(false);
        };
        fs::rename(&backup, &target)
            .await
            .map_err(|e| Error::io(e, "restore_artifact", backup.clone()))?;
        log::info!("Restored previous copy of '{}' at {}", key, target.display());
        Ok(true)
    }

    async fn discard_backup(&self, key: &str) -> Result<()> {
        let Some(Backup { backup, .. }) = self.backups().remove(key) else {
            return Ok(());
        };
        match fs::remove_file(&backup).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, "remove_backup", backup)),
        }
    }

    async fn clear_backups(&self) -> Result<()> {
        self.backups().clear();
        let exists = fs::try_exists(&self.directory)
            .await
            .map_err(|e| Error::io(e, "try_exists", self.directory.clone()))?;
        if !exists {
            return Ok(());
        }
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| Error::io(e, "read_dir", self.directory.clone()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(e, "read_dir_entry", self.directory.clone()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with('.') && name.ends_with(BACKUP_SUFFIX)) {
                continue;
            }
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                log::warn!("Failed to remove stale backup {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}
