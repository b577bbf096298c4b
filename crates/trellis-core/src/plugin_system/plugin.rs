use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{CURRENT_PLUGINS_VERSION, KEY_SEPARATOR};
use crate::kernel::error::Result;
use crate::plugin_system::container::{PluginContainer, StartupGate};
use crate::plugin_system::descriptor::{ModuleDescriptor, ModuleDescriptorFactory};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::PluginVersion;
use crate::storage::state::StateEntity;

/// Runtime state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PluginState {
    /// Registered, not running.
    Installed = 0,
    Enabling = 1,
    Enabled = 2,
    Disabling = 3,
    Uninstalled = 4,
}

impl PluginState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PluginState::Enabling,
            2 => PluginState::Enabled,
            3 => PluginState::Disabling,
            4 => PluginState::Uninstalled,
            _ => PluginState::Installed,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginState::Installed => "installed",
            PluginState::Enabling => "enabling",
            PluginState::Enabled => "enabled",
            PluginState::Disabling => "disabling",
            PluginState::Uninstalled => "uninstalled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInformation {
    pub version: PluginVersion,
    pub description: String,
    pub vendor: Option<String>,
}

impl Default for PluginInformation {
    fn default() -> Self {
        Self {
            version: PluginVersion::new("0"),
            description: String::new(),
            vendor: None,
        }
    }
}

/// A file a plugin was, or will be, loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginArtifact {
    path: PathBuf,
}

impl PluginArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Lower-cased extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

impl fmt::Display for PluginArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// One module entry of a [`PluginDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ModuleSpec {
    pub fn new(key: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            module_type: module_type.into(),
            name: None,
            enabled_by_default: true,
            params: BTreeMap::new(),
        }
    }
}

/// Declarative description of a plugin, as stored in a `.json` artifact or
/// handed to the static loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_plugins_version")]
    pub plugins_version: u32,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub system_plugin: bool,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    /// Plugins with this set run in a container that starts after the delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_delay_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_plugins_version() -> u32 {
    CURRENT_PLUGINS_VERSION
}

impl PluginDescriptor {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            plugins_version: CURRENT_PLUGINS_VERSION,
            version: version.into(),
            description: String::new(),
            vendor: None,
            enabled_by_default: true,
            system_plugin: false,
            requires: Vec::new(),
            modules: Vec::new(),
            startup_delay_ms: None,
        }
    }

    pub fn with_module(mut self, module: ModuleSpec) -> Self {
        self.modules.push(module);
        self
    }

    pub fn requiring(mut self, plugin_key: impl Into<String>) -> Self {
        self.requires.push(plugin_key.into());
        self
    }

    /// Structural checks that need no module classes.
    pub fn validate(&self) -> std::result::Result<(), String> {
        check_key("plugin key", &self.key)?;
        let mut seen = HashSet::new();
        for module in &self.modules {
            check_key("module key", &module.key)?;
            if module.module_type.trim().is_empty() {
                return Err(format!("module '{}' has no type", module.key));
            }
            if !seen.insert(module.key.as_str()) {
                return Err(format!("module key '{}' is declared twice", module.key));
            }
        }
        if self.requires.iter().any(|r| r == &self.key) {
            return Err("a plugin cannot require itself".to_string());
        }
        Ok(())
    }

    /// Resolves module types through `factory` and builds the plugin.
    pub fn build(
        &self,
        factory: &ModuleDescriptorFactory,
        artifact: Option<PluginArtifact>,
    ) -> Result<Plugin> {
        let source = artifact
            .as_ref()
            .map(PluginArtifact::file_name)
            .unwrap_or_else(|| self.key.clone());
        self.validate().map_err(|message| PluginSystemError::DescriptorError {
            artifact: source,
            message,
        })?;

        let modules = self
            .modules
            .iter()
            .map(|spec| factory.create_descriptor(&self.key, spec).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let container: Option<Arc<dyn PluginContainer>> = self
            .startup_delay_ms
            .map(|ms| Arc::new(StartupGate::delayed(Duration::from_millis(ms))) as Arc<dyn PluginContainer>);

        Ok(Plugin {
            key: self.key.clone(),
            name: self.name.clone().unwrap_or_else(|| self.key.clone()),
            plugins_version: self.plugins_version,
            info: PluginInformation {
                version: PluginVersion::new(self.version.as_str()),
                description: self.description.clone(),
                vendor: self.vendor.clone(),
            },
            enabled_by_default: self.enabled_by_default,
            system_plugin: self.system_plugin,
            deletable: true,
            uninstallable: true,
            dynamically_loaded: artifact.is_some(),
            modules,
            required_plugins: self.requires.iter().cloned().collect(),
            artifact,
            container,
            unloadable_reason: None,
            state: AtomicU8::new(PluginState::Installed as u8),
        })
    }
}

fn check_key(what: &str, key: &str) -> std::result::Result<(), String> {
    if key.trim().is_empty() {
        return Err(format!("{} is empty", what));
    }
    if key.contains(KEY_SEPARATOR) {
        return Err(format!("{} '{}' contains '{}'", what, key, KEY_SEPARATOR));
    }
    Ok(())
}

/// An installed unit of extension.
///
/// Plugins are created by loaders, registered and mutated only by the
/// manager. An *unloadable* plugin is a placeholder for one that failed to
/// parse or to enable; it has no modules and can never be enabled.
pub struct Plugin {
    key: String,
    name: String,
    plugins_version: u32,
    info: PluginInformation,
    enabled_by_default: bool,
    system_plugin: bool,
    deletable: bool,
    uninstallable: bool,
    dynamically_loaded: bool,
    modules: Vec<Arc<ModuleDescriptor>>,
    required_plugins: BTreeSet<String>,
    artifact: Option<PluginArtifact>,
    container: Option<Arc<dyn PluginContainer>>,
    unloadable_reason: Option<String>,
    state: AtomicU8,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("key", &self.key)
            .field("version", &self.info.version.as_str())
            .field("state", &self.state())
            .field("modules", &self.modules.len())
            .field("required_plugins", &self.required_plugins)
            .field("unloadable", &self.unloadable_reason)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// Placeholder for an artifact that could not be turned into a plugin.
    pub fn unloadable(key: impl Into<String>, reason: impl Into<String>, artifact: Option<PluginArtifact>) -> Self {
        let key = key.into();
        Plugin {
            name: key.clone(),
            key,
            plugins_version: CURRENT_PLUGINS_VERSION,
            info: PluginInformation {
                version: PluginVersion::new(""),
                ..PluginInformation::default()
            },
            enabled_by_default: false,
            system_plugin: false,
            deletable: true,
            uninstallable: true,
            dynamically_loaded: artifact.is_some(),
            modules: Vec::new(),
            required_plugins: BTreeSet::new(),
            artifact,
            container: None,
            unloadable_reason: Some(reason.into()),
            state: AtomicU8::new(PluginState::Installed as u8),
        }
    }

    /// Same identity and origin, no modules, marked unloadable with `reason`.
    pub fn to_unloadable(&self, reason: impl Into<String>) -> Plugin {
        Plugin {
            key: self.key.clone(),
            name: self.name.clone(),
            plugins_version: self.plugins_version,
            info: self.info.clone(),
            enabled_by_default: self.enabled_by_default,
            system_plugin: self.system_plugin,
            deletable: self.deletable,
            uninstallable: self.uninstallable,
            dynamically_loaded: self.dynamically_loaded,
            modules: Vec::new(),
            required_plugins: self.required_plugins.clone(),
            artifact: self.artifact.clone(),
            container: None,
            unloadable_reason: Some(reason.into()),
            state: AtomicU8::new(PluginState::Installed as u8),
        }
    }

    /// Copy that leaves out requires-restart modules; they wait for the next cold start.
    pub(crate) fn without_restart_modules(&self) -> Plugin {
        Plugin {
            key: self.key.clone(),
            name: self.name.clone(),
            plugins_version: self.plugins_version,
            info: self.info.clone(),
            enabled_by_default: self.enabled_by_default,
            system_plugin: self.system_plugin,
            deletable: self.deletable,
            uninstallable: self.uninstallable,
            dynamically_loaded: self.dynamically_loaded,
            modules: self
                .modules
                .iter()
                .filter(|m| !m.is_requires_restart())
                .cloned()
                .collect(),
            required_plugins: self.required_plugins.clone(),
            artifact: self.artifact.clone(),
            container: self.container.clone(),
            unloadable_reason: self.unloadable_reason.clone(),
            state: AtomicU8::new(PluginState::Installed as u8),
        }
    }

    /// Overrides the removal capabilities, as decided by the loader that owns the plugin.
    pub fn with_removal(mut self, deletable: bool, uninstallable: bool) -> Self {
        self.deletable = deletable;
        self.uninstallable = uninstallable;
        self
    }

    pub fn with_container(mut self, container: Arc<dyn PluginContainer>) -> Self {
        self.container = Some(container);
        self
    }

    pub fn with_dynamically_loaded(mut self, dynamic: bool) -> Self {
        self.dynamically_loaded = dynamic;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugins_version(&self) -> u32 {
        self.plugins_version
    }

    pub fn info(&self) -> &PluginInformation {
        &self.info
    }

    pub fn version(&self) -> &PluginVersion {
        &self.info.version
    }

    pub fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    pub fn is_system_plugin(&self) -> bool {
        self.system_plugin
    }

    pub fn is_deletable(&self) -> bool {
        self.deletable
    }

    pub fn is_uninstallable(&self) -> bool {
        self.uninstallable
    }

    pub fn is_dynamically_loaded(&self) -> bool {
        self.dynamically_loaded
    }

    /// Module descriptors in declaration order.
    pub fn modules(&self) -> &[Arc<ModuleDescriptor>] {
        &self.modules
    }

    /// Lookup by module key (the part after the separator).
    pub fn module(&self, key: &str) -> Option<&Arc<ModuleDescriptor>> {
        self.modules.iter().find(|m| m.key() == key)
    }

    pub fn has_restart_modules(&self) -> bool {
        self.modules.iter().any(|m| m.is_requires_restart())
    }

    pub fn required_plugins(&self) -> &BTreeSet<String> {
        &self.required_plugins
    }

    pub fn artifact(&self) -> Option<&PluginArtifact> {
        self.artifact.as_ref()
    }

    pub fn container(&self) -> Option<&Arc<dyn PluginContainer>> {
        self.container.as_ref()
    }

    pub fn is_unloadable(&self) -> bool {
        self.unloadable_reason.is_some()
    }

    pub fn unloadable_reason(&self) -> Option<&str> {
        self.unloadable_reason.as_deref()
    }

    pub fn state(&self) -> PluginState {
        PluginState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: PluginState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == PluginState::Enabled
    }
}

impl StateEntity for Plugin {
    fn state_key(&self) -> &str {
        &self.key
    }

    fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }
}
