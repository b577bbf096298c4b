use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::event::EventDispatcher;
use crate::event::types::{
    FrameworkShutdownEvent, FrameworkShuttingDownEvent, FrameworkStartedEvent,
    FrameworkStartingEvent, FrameworkWarmRestartedEvent, FrameworkWarmRestartingEvent,
    PluginDisabledEvent, PluginEnabledEvent, PluginInstalledEvent, PluginUninstalledEvent,
    PluginUpgradedEvent,
};
use crate::kernel::constants::{self, KEY_SEPARATOR};
use crate::kernel::error::{Error, Result};
use crate::kernel::lifecycle::{ManagerState, StateTracker};
use crate::plugin_system::cascade;
use crate::plugin_system::container::PluginContainer;
use crate::plugin_system::descriptor::{ModuleDescriptor, ModuleDescriptorFactory, ModuleInstance};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::installer::{FilePluginInstaller, PluginInstaller};
use crate::plugin_system::loader::{
    ArtifactIdentity, BundledPluginLoader, DirectoryPluginLoader, DynamicPluginLoader, PluginLoader,
};
use crate::plugin_system::plugin::{Plugin, PluginArtifact, PluginState};
use crate::plugin_system::registry::{PluginRegistry, RegisteredPlugin};
use crate::storage::config::ManagerConfig;
use crate::storage::state::{PersistedState, PersistedStateBuilder, RestartState};
use crate::storage::store::{JsonFileStateStore, PersistentStateStore};

/// A strictly newer artifact held back until the next cold start.
struct PendingUpgrade {
    plugin: Plugin,
    loader: Arc<dyn PluginLoader>,
}

/// Discovers, registers, enables, disables, upgrades and removes plugins.
///
/// Lifecycle-mutating operations (`init`, `shutdown`, `warm_restart`,
/// enable/disable, install, scan, uninstall, revert) run one at a time behind
/// an async mutex. Queries only take a short read lock on the registry, so
/// they keep answering while, say, an install waits for a container.
pub struct PluginManager {
    config: ManagerConfig,
    loaders: Vec<Arc<dyn PluginLoader>>,
    installer: Option<Arc<dyn PluginInstaller>>,
    store: Arc<dyn PersistentStateStore>,
    module_factory: Arc<ModuleDescriptorFactory>,
    events: Arc<EventDispatcher>,
    tracker: StateTracker,
    lifecycle: tokio::sync::Mutex<()>,
    registry: RwLock<PluginRegistry>,
    persisted: RwLock<PersistedState>,
    pending_upgrades: Mutex<HashMap<String, PendingUpgrade>>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("state", &self.tracker.get())
            .field("loaders", &self.loaders)
            .field("installer", &self.installer)
            .field("plugins", &self.plugin_count())
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    pub fn new(
        config: ManagerConfig,
        module_factory: Arc<ModuleDescriptorFactory>,
        store: Arc<dyn PersistentStateStore>,
    ) -> Self {
        Self {
            config,
            loaders: Vec::new(),
            installer: None,
            store,
            module_factory,
            events: Arc::new(EventDispatcher::new()),
            tracker: StateTracker::new(),
            lifecycle: tokio::sync::Mutex::new(()),
            registry: RwLock::new(PluginRegistry::new()),
            persisted: RwLock::new(PersistedState::new()),
            pending_upgrades: Mutex::new(HashMap::new()),
        }
    }

    /// Wires the standard setup described by `config`: a bundled loader, a
    /// hot-deploy directory loader with its installer, and a JSON state file.
    pub fn from_config(config: ManagerConfig, module_factory: Arc<ModuleDescriptorFactory>) -> Self {
        let store = Arc::new(JsonFileStateStore::new(config.state_file.clone()));
        let bundled = config.bundled_directory.clone();
        let hot = config.plugin_directory.clone();
        let mut manager = Self::new(config, module_factory, store);
        if let Some(dir) = bundled {
            manager = manager.with_loader(Arc::new(BundledPluginLoader::new(dir)));
        }
        if let Some(dir) = hot {
            manager = manager
                .with_loader(Arc::new(DirectoryPluginLoader::new(dir.clone())))
                .with_installer(Arc::new(FilePluginInstaller::new(dir)));
        }
        manager
    }

    /// Loaders are consulted in the order they are added.
    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn module_factory(&self) -> &Arc<ModuleDescriptorFactory> {
        &self.module_factory
    }

    pub fn state(&self) -> ManagerState {
        self.tracker.get()
    }

    // --- lock helpers; none of these guards may live across an await ---

    fn read_registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingUpgrade>> {
        self.pending_upgrades.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persisted_state(&self) -> PersistedState {
        self.persisted.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn registered(&self, key: &str) -> Option<RegisteredPlugin> {
        self.read_registry().get(key).cloned()
    }

    fn registered_plugin(&self, key: &str) -> Option<Arc<Plugin>> {
        self.read_registry().get_plugin(key)
    }

    fn startup_order(&self) -> Vec<String> {
        cascade::startup_order(&self.read_registry())
    }

    /// Applies `edit` to the cached state and writes the result to the store.
    async fn update_persisted<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PersistedStateBuilder) + Send,
    {
        let snapshot = {
            let mut state = self.persisted.write().unwrap_or_else(PoisonError::into_inner);
            let mut builder = state.to_builder();
            edit(&mut builder);
            *state = builder.to_state();
            state.clone()
        };
        self.store.save(&snapshot).await
    }

    // --- lifecycle ---

    /// Loads every plugin from every loader and brings each to its persisted state.
    ///
    /// Allowed from `NOT_STARTED` and `SHUTDOWN`. A duplicate key that can be
    /// neither upgraded nor unloaded aborts the start with
    /// [`PluginSystemError::DuplicatePlugin`].
    pub async fn init(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.tracker.set_state(ManagerState::Starting)?;
        log::info!("Starting {} plugin framework v{}", constants::APP_NAME, constants::APP_VERSION);
        self.events.broadcast(&FrameworkStartingEvent);

        let persisted = self.store.load().await?;
        *self.persisted.write().unwrap_or_else(PoisonError::into_inner) = persisted.clone();
        self.pending().clear();
        if let Some(installer) = &self.installer {
            if let Err(e) = installer.clear_backups().await {
                log::warn!("Failed to clear replaced plugin copies: {}", e);
            }
        }

        let mut batch = Vec::new();
        for loader in &self.loaders {
            let plugins = loader.load_all_plugins(&self.module_factory).await?;
            log::debug!("Loader '{}' provided {} plugin(s)", loader.name(), plugins.len());
            batch.extend(plugins.into_iter().map(|plugin| (plugin, Arc::clone(loader))));
        }
        order_batch(&mut batch);

        let mut removed = Vec::new();
        for (plugin, loader) in batch {
            if persisted.get_restart_state(plugin.key()) == RestartState::Remove {
                if loader.supports_removal() {
                    log::info!("Removing plugin '{}' as requested before the restart", plugin.key());
                    if let Err(e) = loader.remove_plugin(&plugin).await {
                        log::warn!("Failed to remove plugin '{}': {}", plugin.key(), e);
                    }
                    removed.push(plugin.key().to_string());
                    continue;
                }
                log::warn!(
                    "Plugin '{}' is marked for removal but loader '{}' cannot remove it",
                    plugin.key(),
                    loader.name()
                );
            }
            self.register_at_startup(plugin, loader).await?;
        }

        self.update_persisted(|state| {
            state.clear_all_restart_states();
            for key in &removed {
                state.remove_all_state_for(key);
            }
        })
        .await?;

        for key in self.startup_order() {
            self.enable_from_persisted_state(&key).await;
        }

        self.tracker.set_state(ManagerState::Started)?;
        log::info!("Plugin framework started with {} plugin(s)", self.plugin_count());
        self.events.broadcast(&FrameworkStartedEvent);
        Ok(())
    }

    /// Disables every plugin, dependents first, and empties the registry.
    ///
    /// Nothing is persisted: the next `init()` restores the same enabled set.
    pub async fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.tracker.set_state(ManagerState::ShuttingDown)?;
        log::info!("Shutting down plugin framework");
        self.events.broadcast(&FrameworkShuttingDownEvent);

        for key in self.startup_order().iter().rev() {
            if let Some(plugin) = self.registered_plugin(key) {
                self.disable_registered(&plugin);
            }
        }
        let plugins: Vec<Arc<Plugin>> = self.read_registry().plugins().cloned().collect();
        for plugin in plugins {
            plugin.set_state(PluginState::Uninstalled);
        }
        self.write_registry().clear();
        self.pending().clear();

        self.tracker.set_state(ManagerState::Shutdown)?;
        self.events.broadcast(&FrameworkShutdownEvent);
        Ok(())
    }

    /// Re-creates the modules of dynamically loaded, enabled plugins in place.
    pub async fn warm_restart(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.tracker.set_state(ManagerState::WarmRestarting)?;
        log::info!("Warm restarting dynamically loaded plugins");
        self.events.broadcast(&FrameworkWarmRestartingEvent);

        let state = self.persisted_state();
        for key in self.startup_order() {
            let Some(plugin) = self.registered_plugin(&key) else {
                continue;
            };
            if !plugin.is_dynamically_loaded() || !plugin.is_enabled() {
                continue;
            }
            cascade::disable_modules(&plugin, &self.events);
            for module in plugin.modules() {
                module.clear_module();
            }
            if let Err(failure) = cascade::enable_modules(&plugin, &state, &self.events) {
                self.mark_unloadable(&plugin, &failure.module_key, &failure.error);
                self.events.broadcast(&PluginDisabledEvent::new(plugin.key()));
            }
        }

        self.tracker.set_state(ManagerState::Started)?;
        self.events.broadcast(&FrameworkWarmRestartedEvent);
        Ok(())
    }

    async fn register_at_startup(&self, plugin: Plugin, loader: Arc<dyn PluginLoader>) -> Result<()> {
        let Some(current) = self.registered(plugin.key()) else {
            self.write_registry().register(Arc::new(plugin), loader);
            return Ok(());
        };
        if !self.resolve_duplicate(&current, &plugin, &loader).await? {
            return Ok(());
        }
        log::info!(
            "Plugin '{}' {} replaces version {}",
            plugin.key(),
            plugin.version(),
            current.plugin.version()
        );
        self.remove_replaced(&current, &plugin).await;
        current.plugin.set_state(PluginState::Uninstalled);
        self.write_registry().register(Arc::new(plugin), loader);
        Ok(())
    }

    /// Enables a registered plugin if the persisted state and its dependencies allow it.
    async fn enable_from_persisted_state(&self, key: &str) {
        let Some(plugin) = self.registered_plugin(key) else {
            return;
        };
        if plugin.is_unloadable() || plugin.is_enabled() {
            return;
        }
        if !self.persisted_state().is_entity_enabled(plugin.as_ref()) {
            log::debug!("Plugin '{}' is disabled", key);
            return;
        }
        self.enable_if_dependencies_up(&plugin).await;
    }

    /// Enables `plugin` when every plugin it requires is enabled; logs otherwise.
    async fn enable_if_dependencies_up(&self, plugin: &Arc<Plugin>) {
        let missing = plugin
            .required_plugins()
            .iter()
            .find(|dep| !self.registered_plugin(dep).is_some_and(|p| p.is_enabled()))
            .cloned();
        if let Some(dependency) = missing {
            log::warn!(
                "Plugin '{}' stays disabled: required plugin '{}' is not enabled",
                plugin.key(),
                dependency
            );
            return;
        }
        if let Err(e) = self.enable_registered(plugin).await {
            log::error!("Failed to enable plugin '{}': {}", plugin.key(), e);
        }
    }

    // --- enable / disable ---

    /// Brings one registered plugin up. `Ok(false)` if it already was, or if its
    /// container did not start within the configured timeout.
    async fn enable_registered(&self, plugin: &Arc<Plugin>) -> Result<bool> {
        if plugin.is_enabled() {
            return Ok(false);
        }
        if let Some(reason) = plugin.unloadable_reason() {
            return Err(PluginSystemError::Unloadable {
                plugin_key: plugin.key().to_string(),
                reason: reason.to_string(),
            }
            .into());
        }

        plugin.set_state(PluginState::Enabling);
        if let Some(container) = plugin.container() {
            if !container.is_started() {
                let timeout = self.config.container_startup_timeout();
                log::debug!("Waiting up to {:?} for the container of '{}'", timeout, plugin.key());
                if tokio::time::timeout(timeout, container.wait_until_started()).await.is_err() {
                    log::warn!(
                        "Container of plugin '{}' did not start within {:?}; leaving it disabled",
                        plugin.key(),
                        timeout
                    );
                    plugin.set_state(PluginState::Installed);
                    return Ok(false);
                }
            }
        }

        let state = self.persisted_state();
        match cascade::enable_modules(plugin, &state, &self.events) {
            Ok(count) => {
                plugin.set_state(PluginState::Enabled);
                log::info!("Enabled plugin '{}' ({} module(s))", plugin.key(), count);
                self.events.broadcast(&PluginEnabledEvent::new(plugin.key()));
                Ok(true)
            }
            Err(failure) => {
                self.mark_unloadable(plugin, &failure.module_key, &failure.error);
                Err(PluginSystemError::ModuleError {
                    module_key: failure.module_key,
                    message: failure.error.to_string(),
                }
                .into())
            }
        }
    }

    fn mark_unloadable(&self, plugin: &Plugin, module_key: &str, error: &Error) {
        plugin.set_state(PluginState::Installed);
        let reason = format!("module '{}' failed to enable: {}", module_key, error);
        log::error!("Plugin '{}' is now unloadable: {}", plugin.key(), reason);
        self.write_registry()
            .replace_plugin(Arc::new(plugin.to_unloadable(reason)));
    }

    /// Takes one plugin down. Returns whether it was enabled.
    fn disable_registered(&self, plugin: &Plugin) -> bool {
        if !plugin.is_enabled() {
            return false;
        }
        plugin.set_state(PluginState::Disabling);
        cascade::disable_modules(plugin, &self.events);
        plugin.set_state(PluginState::Installed);
        log::info!("Disabled plugin '{}'", plugin.key());
        self.events.broadcast(&PluginDisabledEvent::new(plugin.key()));
        true
    }

    /// Enables `key` after every plugin it requires, and records each plugin
    /// that came up as administratively enabled.
    pub async fn enable_plugin(&self, key: &str) -> Result<()> {
        Error::require_key("key", key)?;
        let _lifecycle = self.lifecycle.lock().await;
        self.enable_plugin_locked(key).await
    }

    async fn enable_plugin_locked(&self, key: &str) -> Result<()> {
        let target = self
            .registered_plugin(key)
            .ok_or_else(|| PluginSystemError::PluginNotFound(key.to_string()))?;
        if let Some(reason) = target.unloadable_reason() {
            return Err(PluginSystemError::Unloadable {
                plugin_key: key.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }
        let order = cascade::enable_order(&self.read_registry(), key)?;

        let mut came_up: Vec<Arc<Plugin>> = Vec::new();
        let mut outcome = Ok(());
        for k in &order {
            let Some(plugin) = self.registered_plugin(k) else {
                continue;
            };
            match self.enable_registered(&plugin).await {
                Ok(true) => came_up.push(Arc::clone(&plugin)),
                Ok(false) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            if k != key && !plugin.is_enabled() {
                outcome = Err(PluginSystemError::MissingDependency {
                    plugin_key: key.to_string(),
                    dependency: k.clone(),
                }
                .into());
                break;
            }
        }
        if target.is_enabled() && !came_up.iter().any(|p| Arc::ptr_eq(p, &target)) {
            came_up.push(target);
        }

        self.update_persisted(move |state| {
            for plugin in &came_up {
                state.set_entity_enabled(plugin.as_ref(), true);
            }
        })
        .await?;
        outcome
    }

    /// Disables `key` after every plugin requiring it, and records all of them
    /// as administratively disabled.
    pub async fn disable_plugin(&self, key: &str) -> Result<()> {
        Error::require_key("key", key)?;
        let _lifecycle = self.lifecycle.lock().await;
        self.disable_plugin_locked(key, true).await
    }

    /// Same cascade as [`disable_plugin`](Self::disable_plugin), persisted state untouched.
    pub async fn disable_plugin_without_persisting(&self, key: &str) -> Result<()> {
        Error::require_key("key", key)?;
        let _lifecycle = self.lifecycle.lock().await;
        self.disable_plugin_locked(key, false).await
    }

    async fn disable_plugin_locked(&self, key: &str, persist: bool) -> Result<()> {
        let target = self
            .registered_plugin(key)
            .ok_or_else(|| PluginSystemError::PluginNotFound(key.to_string()))?;
        let went_down = self.disable_cascade(key);
        if persist {
            self.update_persisted(move |state| {
                for plugin in &went_down {
                    state.set_entity_enabled(plugin.as_ref(), false);
                }
                state.set_entity_enabled(target.as_ref(), false);
            })
            .await?;
        }
        Ok(())
    }

    /// Disables dependents deepest first, then `key`. Returns the plugins that went down.
    fn disable_cascade(&self, key: &str) -> Vec<Arc<Plugin>> {
        let order = cascade::disable_order(&self.read_registry(), key);
        order
            .iter()
            .filter_map(|k| self.registered_plugin(k))
            .filter(|plugin| self.disable_registered(plugin))
            .collect()
    }

    fn find_module(&self, complete_key: &str) -> Option<(Arc<Plugin>, Arc<ModuleDescriptor>)> {
        let (plugin_key, module_key) = complete_key.split_once(KEY_SEPARATOR)?;
        let plugin = self.registered_plugin(plugin_key)?;
        let module = Arc::clone(plugin.module(module_key)?);
        Some((plugin, module))
    }

    /// Records the module as enabled and starts it if its plugin is running.
    ///
    /// A disabled plugin is not enabled by this; the module comes up with it.
    pub async fn enable_plugin_module(&self, complete_key: &str) -> Result<()> {
        Error::require_key("complete_key", complete_key)?;
        let _lifecycle = self.lifecycle.lock().await;
        let (plugin, module) = self
            .find_module(complete_key)
            .ok_or_else(|| PluginSystemError::ModuleNotFound(complete_key.to_string()))?;
        if plugin.is_enabled() {
            cascade::enable_module(&module, &self.events)?;
        }
        self.update_persisted(move |state| {
            state.set_entity_enabled(module.as_ref(), true);
        })
        .await
    }

    /// Stops the module and records it as disabled. Cannot-disable modules are left alone.
    pub async fn disable_plugin_module(&self, complete_key: &str) -> Result<()> {
        Error::require_key("complete_key", complete_key)?;
        let _lifecycle = self.lifecycle.lock().await;
        let (_, module) = self
            .find_module(complete_key)
            .ok_or_else(|| PluginSystemError::ModuleNotFound(complete_key.to_string()))?;
        if module.is_cannot_disable() {
            log::info!("Module '{}' cannot be disabled", complete_key);
            return Ok(());
        }
        cascade::disable_module(&module, &self.events);
        self.update_persisted(move |state| {
            state.set_entity_enabled(module.as_ref(), false);
        })
        .await
    }

    // --- discovery, install, upgrade ---

    /// Asks every loader that supports addition for new or changed artifacts
    /// and registers what they return. Returns how many plugins were found.
    pub async fn scan_for_new_plugins(&self) -> Result<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        Ok(self.scan_locked().await?.len())
    }

    async fn scan_locked(&self) -> Result<Vec<String>> {
        let mut batch = Vec::new();
        for loader in self.loaders.iter().filter(|l| l.supports_addition()) {
            let plugins = loader.add_found_plugins(&self.module_factory).await?;
            batch.extend(plugins.into_iter().map(|plugin| (plugin, Arc::clone(loader))));
        }
        order_batch(&mut batch);

        let mut found = Vec::with_capacity(batch.len());
        for (plugin, loader) in batch {
            found.push(plugin.key().to_string());
            self.add_plugin_incrementally(plugin, loader).await?;
        }
        // One batch may hold a plugin and its dependency; enable after registering all of them.
        for key in self.startup_order().iter().filter(|key| found.contains(key)) {
            self.enable_from_persisted_state(key).await;
        }
        if !found.is_empty() {
            log::info!("Scan found {} plugin(s): {:?}", found.len(), found);
        }
        Ok(found)
    }

    async fn add_plugin_incrementally(&self, plugin: Plugin, loader: Arc<dyn PluginLoader>) -> Result<()> {
        let key = plugin.key().to_string();
        let Some(current) = self.registered(&key) else {
            let plugin = if plugin.has_restart_modules() {
                log::info!("Plugin '{}' has modules that load only after a restart", key);
                self.update_persisted(|state| {
                    state.set_restart_state(&key, RestartState::Install);
                })
                .await?;
                plugin.without_restart_modules()
            } else {
                plugin
            };
            let plugin = Arc::new(plugin);
            self.write_registry().register(Arc::clone(&plugin), loader);
            log::info!("Installed plugin '{}' {}", key, plugin.version());
            self.events.broadcast(&PluginInstalledEvent::new(&key));
            return Ok(());
        };

        if !self.resolve_duplicate(&current, &plugin, &loader).await? {
            return Ok(());
        }
        if current.plugin.has_restart_modules() || plugin.has_restart_modules() {
            log::info!(
                "Upgrade of '{}' to {} involves modules that require a restart; deferring it",
                key,
                plugin.version()
            );
            self.update_persisted(|state| {
                state.set_restart_state(&key, RestartState::Upgrade);
            })
            .await?;
            self.pending().insert(key, PendingUpgrade { plugin, loader });
            return Ok(());
        }
        self.upgrade(current, plugin, loader).await
    }

    /// Decides a key collision. `Ok(true)` means `candidate` is strictly newer
    /// and should replace `current`; otherwise the candidate has been dropped.
    async fn resolve_duplicate(
        &self,
        current: &RegisteredPlugin,
        candidate: &Plugin,
        loader: &Arc<dyn PluginLoader>,
    ) -> Result<bool> {
        let key = candidate.key();
        if candidate.is_unloadable() && !current.plugin.is_unloadable() {
            log::warn!(
                "Ignoring unloadable artifact for '{}': {}",
                key,
                candidate.unloadable_reason().unwrap_or_default()
            );
            return Ok(false);
        }
        if candidate.version() > current.plugin.version() {
            return Ok(true);
        }
        if same_artifact(candidate, &current.plugin) {
            log::debug!("Plugin '{}' was reported again from the same artifact", key);
            return Ok(false);
        }
        if loader.supports_removal() {
            log::warn!(
                "Duplicate plugin '{}' ({}) is not newer than the installed {}; unloading it",
                key,
                candidate.version(),
                current.plugin.version()
            );
            if let Err(e) = loader.remove_plugin(candidate).await {
                log::error!("Could not unload duplicate plugin '{}': {}", key, e);
                return Err(PluginSystemError::DuplicatePlugin { key: key.to_string() }.into());
            }
            return Ok(false);
        }
        Err(PluginSystemError::DuplicatePlugin { key: key.to_string() }.into())
    }

    /// Deletes the artifact of a plugin that is being replaced, when it has its own.
    async fn remove_replaced(&self, replaced: &RegisteredPlugin, replacement: &Plugin) {
        if replaced.plugin.is_unloadable()
            || !replaced.loader.supports_removal()
            || same_artifact(&replaced.plugin, replacement)
        {
            return;
        }
        if let Err(e) = replaced.loader.remove_plugin(&replaced.plugin).await {
            log::warn!("Failed to remove old artifact of '{}': {}", replaced.plugin.key(), e);
        }
    }

    async fn upgrade(&self, current: RegisteredPlugin, plugin: Plugin, loader: Arc<dyn PluginLoader>) -> Result<()> {
        let key = plugin.key().to_string();
        let previous_version = current.plugin.version().to_string();
        let version = plugin.version().to_string();
        log::info!("Upgrading plugin '{}' from {} to {}", key, previous_version, version);

        let dependent_keys = cascade::dependents_of(&self.read_registry(), &key);
        let dependents: Vec<Arc<Plugin>> = dependent_keys
            .iter()
            .filter_map(|k| self.registered_plugin(k))
            .filter(|p| self.disable_registered(p))
            .collect();
        self.disable_registered(&current.plugin);
        self.remove_replaced(&current, &plugin).await;
        current.plugin.set_state(PluginState::Uninstalled);

        self.write_registry().register(Arc::new(plugin), loader);
        self.enable_from_persisted_state(&key).await;
        for dependent in dependents.iter().rev() {
            self.enable_if_dependencies_up(dependent).await;
        }

        self.events.broadcast(&PluginUpgradedEvent {
            plugin_key: key,
            previous_version,
            version,
        });
        Ok(())
    }

    /// Validates every artifact, copies them through the installer and picks
    /// them up with a scan. Returns the installed keys.
    ///
    /// If any artifact is rejected nothing is installed. An artifact for a
    /// key that is already installed must carry a strictly newer version. A
    /// plugin whose container does not start in time stays registered but
    /// disabled.
    pub async fn install_plugins(&self, artifacts: &[PluginArtifact]) -> Result<Vec<String>> {
        let _lifecycle = self.lifecycle.lock().await;
        let installer = self.installer.as_ref().ok_or_else(|| PluginSystemError::InstallationError {
            plugin_key: artifacts.first().map(PluginArtifact::file_name).unwrap_or_default(),
            message: "no plugin installer is configured".to_string(),
        })?;
        let dynamic: Vec<&dyn DynamicPluginLoader> =
            self.loaders.iter().filter_map(|l| l.as_dynamic()).collect();

        let mut accepted: Vec<(ArtifactIdentity, &PluginArtifact)> = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let identity = recognize_artifact(&dynamic, artifact).await?;
            if accepted.iter().any(|(other, _)| other.key == identity.key) {
                return Err(PluginSystemError::DuplicatePlugin { key: identity.key }.into());
            }
            self.check_upgrade(&identity)?;
            accepted.push((identity, artifact));
        }

        let mut keys = Vec::with_capacity(accepted.len());
        for (identity, artifact) in accepted {
            installer.install_plugin(&identity.key, artifact).await?;
            keys.push(identity.key);
        }
        self.scan_locked().await?;

        // Only a deferred upgrade can still be reverted.
        for key in &keys {
            if self.persisted_state().get_restart_state(key) != RestartState::Upgrade {
                if let Err(e) = installer.discard_backup(key).await {
                    log::warn!("Failed to remove the replaced copy of '{}': {}", key, e);
                }
            }
        }
        Ok(keys)
    }

    /// An artifact for an installed key must be strictly newer than the running
    /// plugin and than any upgrade already waiting for a restart.
    fn check_upgrade(&self, identity: &ArtifactIdentity) -> Result<()> {
        let running = self
            .registered_plugin(&identity.key)
            .filter(|plugin| !plugin.is_unloadable())
            .map(|plugin| plugin.version().clone());
        let pending = self
            .pending()
            .get(&identity.key)
            .map(|upgrade| upgrade.plugin.version().clone());
        if let Some(installed) = running.into_iter().chain(pending).find(|v| identity.version <= *v) {
            log::warn!(
                "Refusing to install '{}' {}: version {} is already installed",
                identity.key,
                identity.version,
                installed
            );
            return Err(PluginSystemError::DuplicatePlugin {
                key: identity.key.clone(),
            }
            .into());
        }
        Ok(())
    }

    // --- uninstall / revert ---

    /// Removes the plugin through its loader after taking down its dependents.
    ///
    /// Rejected without any change if the loader cannot remove plugins. A
    /// plugin holding requires-restart modules is only marked `REMOVE`.
    pub async fn uninstall(&self, key: &str) -> Result<()> {
        Error::require_key("key", key)?;
        let _lifecycle = self.lifecycle.lock().await;
        let entry = self
            .registered(key)
            .ok_or_else(|| PluginSystemError::PluginNotFound(key.to_string()))?;
        if !entry.loader.supports_removal() {
            return Err(PluginSystemError::RemovalNotSupported {
                plugin_key: key.to_string(),
                loader: entry.loader.name().to_string(),
            }
            .into());
        }
        if !entry.plugin.is_uninstallable() {
            return Err(PluginSystemError::NotUninstallable(key.to_string()).into());
        }

        if self.persisted_state().get_restart_state(key) == RestartState::Upgrade {
            self.discard_pending_upgrade(key).await?;
        }
        let marker = self.persisted_state().get_restart_state(key);
        if marker != RestartState::Install && entry.plugin.has_restart_modules() {
            log::info!("Plugin '{}' will be removed on the next restart", key);
            return self
                .update_persisted(|state| {
                    state.set_restart_state(key, RestartState::Remove);
                })
                .await;
        }
        self.uninstall_now(entry).await
    }

    async fn uninstall_now(&self, entry: RegisteredPlugin) -> Result<()> {
        let key = entry.plugin.key().to_string();
        let went_down = self.disable_cascade(&key);
        entry.loader.remove_plugin(&entry.plugin).await?;

        let plugin_key = key.clone();
        self.update_persisted(move |state| {
            for plugin in went_down.iter().filter(|p| p.key() != plugin_key) {
                state.set_entity_enabled(plugin.as_ref(), false);
            }
            state.remove_all_state_for(&plugin_key);
            state.set_restart_state(&plugin_key, RestartState::None);
        })
        .await?;

        if let Some(installer) = &self.installer {
            if let Err(e) = installer.discard_backup(&key).await {
                log::warn!("Failed to remove the replaced copy of '{}': {}", key, e);
            }
        }
        self.write_registry().unregister(&key);
        entry.plugin.set_state(PluginState::Uninstalled);
        log::info!("Uninstalled plugin '{}'", key);
        self.events.broadcast(&PluginUninstalledEvent::new(key));
        Ok(())
    }

    /// Cancels a change that was waiting for a restart.
    ///
    /// `REMOVE` is simply dropped, `INSTALL` uninstalls the half-loaded plugin,
    /// and `UPGRADE` removes the held-back artifact. The marker ends up `NONE`.
    pub async fn revert_restart_required_change(&self, key: &str) -> Result<()> {
        Error::require_key("key", key)?;
        let _lifecycle = self.lifecycle.lock().await;
        match self.persisted_state().get_restart_state(key) {
            RestartState::None => Ok(()),
            RestartState::Remove => {
                log::info!("Plugin '{}' will no longer be removed on restart", key);
                self.update_persisted(|state| {
                    state.set_restart_state(key, RestartState::None);
                })
                .await
            }
            RestartState::Install => match self.registered(key) {
                Some(entry) => self.uninstall_now(entry).await,
                None => {
                    self.update_persisted(|state| {
                        state.set_restart_state(key, RestartState::None);
                    })
                    .await
                }
            },
            RestartState::Upgrade => self.discard_pending_upgrade(key).await,
        }
    }

    async fn discard_pending_upgrade(&self, key: &str) -> Result<()> {
        let pending = self.pending().remove(key);
        if let Some(PendingUpgrade { plugin, loader }) = pending {
            log::info!("Discarding pending upgrade of '{}' to {}", key, plugin.version());
            let running = self.registered_plugin(key);
            if running.is_some_and(|current| same_artifact(&current, &plugin)) {
                // Installed over the running plugin's file; put the old copy back.
                let restored = match &self.installer {
                    Some(installer) => match installer.revert_installed_plugin(key).await {
                        Ok(restored) => restored,
                        Err(e) => {
                            self.pending().insert(key.to_string(), PendingUpgrade { plugin, loader });
                            return Err(e);
                        }
                    },
                    None => false,
                };
                if restored {
                    log::info!("Restored the previous artifact of '{}'", key);
                } else {
                    log::warn!("Pending upgrade of '{}' overwrote the running artifact and no copy was kept", key);
                }
            } else if loader.supports_removal() {
                if let Err(e) = loader.remove_plugin(&plugin).await {
                    log::warn!("Failed to remove pending artifact of '{}': {}", key, e);
                }
            }
        }
        self.update_persisted(|state| {
            state.set_restart_state(key, RestartState::None);
        })
        .await
    }

    // --- queries ---

    pub fn plugin_count(&self) -> usize {
        self.read_registry().plugin_count()
    }

    pub fn get_plugin(&self, key: &str) -> Result<Option<Arc<Plugin>>> {
        Error::require_key("key", key)?;
        Ok(self.registered_plugin(key))
    }

    pub fn get_enabled_plugin(&self, key: &str) -> Result<Option<Arc<Plugin>>> {
        Ok(self.get_plugin(key)?.filter(|plugin| plugin.is_enabled()))
    }

    pub fn is_plugin_enabled(&self, key: &str) -> Result<bool> {
        Ok(self.get_enabled_plugin(key)?.is_some())
    }

    /// Every registered plugin, in registration order.
    pub fn get_all_plugins(&self) -> Vec<Arc<Plugin>> {
        self.read_registry().plugins().cloned().collect()
    }

    pub fn get_enabled_plugins(&self) -> Vec<Arc<Plugin>> {
        self.get_plugins(Plugin::is_enabled)
    }

    pub fn get_plugins<P>(&self, predicate: P) -> Vec<Arc<Plugin>>
    where
        P: Fn(&Plugin) -> bool,
    {
        self.read_registry()
            .plugins()
            .filter(|plugin| predicate(plugin))
            .cloned()
            .collect()
    }

    pub fn get_plugin_module(&self, complete_key: &str) -> Result<Option<Arc<ModuleDescriptor>>> {
        Error::require_key("complete_key", complete_key)?;
        Ok(self.find_module(complete_key).map(|(_, module)| module))
    }

    /// The module, if both it and its plugin are enabled.
    pub fn get_enabled_plugin_module(&self, complete_key: &str) -> Result<Option<Arc<ModuleDescriptor>>> {
        Error::require_key("complete_key", complete_key)?;
        Ok(self
            .find_module(complete_key)
            .filter(|(plugin, module)| plugin.is_enabled() && module.is_enabled())
            .map(|(_, module)| module))
    }

    pub fn is_plugin_module_enabled(&self, complete_key: &str) -> Result<bool> {
        Ok(self.get_enabled_plugin_module(complete_key)?.is_some())
    }

    fn enabled_module_pairs(&self) -> Vec<(Arc<Plugin>, Arc<ModuleDescriptor>)> {
        let registry = self.read_registry();
        let pairs = registry
            .plugins()
            .filter(|plugin| plugin.is_enabled())
            .flat_map(|plugin| {
                plugin
                    .modules()
                    .iter()
                    .filter(|module| module.is_enabled())
                    .map(move |module| (Arc::clone(plugin), Arc::clone(module)))
            })
            .collect();
        pairs
    }

    /// Descriptors of enabled modules whose class is `class_name` or a subclass of it.
    pub fn get_enabled_module_descriptors_by_class(&self, class_name: &str) -> Vec<Arc<ModuleDescriptor>> {
        self.get_module_descriptors(|module| module.class().is_subclass_of(class_name))
    }

    pub fn get_enabled_module_descriptors_by_type(&self, module_type: &str) -> Vec<Arc<ModuleDescriptor>> {
        self.get_module_descriptors(|module| module.module_type() == module_type)
    }

    /// Descriptors of enabled modules matching `predicate`.
    pub fn get_module_descriptors<P>(&self, predicate: P) -> Vec<Arc<ModuleDescriptor>>
    where
        P: Fn(&ModuleDescriptor) -> bool,
    {
        self.enabled_module_pairs()
            .into_iter()
            .filter(|(_, module)| predicate(module))
            .map(|(_, module)| module)
            .collect()
    }

    /// Module objects of enabled modules matching `predicate`.
    pub fn get_modules<P>(&self, predicate: P) -> Vec<ModuleInstance>
    where
        P: Fn(&ModuleDescriptor) -> bool,
    {
        self.materialize(|module| predicate(module))
            .into_iter()
            .map(|(_, instance)| instance)
            .collect()
    }

    pub fn get_enabled_modules_by_class(&self, class_name: &str) -> Vec<(Arc<ModuleDescriptor>, ModuleInstance)> {
        self.materialize(|module| module.class().is_subclass_of(class_name))
    }

    /// Enabled module objects of concrete type `T`, with their descriptors.
    pub fn get_enabled_modules_by_type<T>(&self) -> Vec<(Arc<ModuleDescriptor>, Arc<T>)>
    where
        T: Any + Send + Sync,
    {
        self.materialize(|_| true)
            .into_iter()
            .filter_map(|(module, instance)| instance.downcast::<T>().ok().map(|typed| (module, typed)))
            .collect()
    }

    /// Creates module objects on demand. A module that fails to materialize
    /// takes its plugin down (not persisted) and is skipped.
    fn materialize<P>(&self, predicate: P) -> Vec<(Arc<ModuleDescriptor>, ModuleInstance)>
    where
        P: Fn(&ModuleDescriptor) -> bool,
    {
        let mut modules = Vec::new();
        for (plugin, module) in self.enabled_module_pairs() {
            if !predicate(&module) || !plugin.is_enabled() || !module.is_enabled() {
                continue;
            }
            match module.module() {
                Ok(instance) => modules.push((module, instance)),
                Err(e) => {
                    log::error!(
                        "Module '{}' could not be created, disabling plugin '{}': {}",
                        module.complete_key(),
                        plugin.key(),
                        e
                    );
                    self.disable_registered(&plugin);
                }
            }
        }
        modules
    }

    pub fn get_restart_state(&self, key: &str) -> Result<RestartState> {
        Error::require_key("key", key)?;
        Ok(self.persisted_state().get_restart_state(key))
    }

    /// Registered plugins that require `key`, transitively, deepest first.
    pub fn get_dependent_plugin_keys(&self, key: &str) -> Result<Vec<String>> {
        Error::require_key("key", key)?;
        Ok(cascade::dependents_of(&self.read_registry(), key))
    }

    /// Registered plugins `key` requires, transitively, deepest first.
    pub fn get_plugins_required_by(&self, key: &str) -> Result<Vec<String>> {
        Error::require_key("key", key)?;
        Ok(cascade::dependencies_of(&self.read_registry(), key))
    }
}

/// Identity of the artifact according to the first dynamic loader that recognizes it.
async fn recognize_artifact(
    loaders: &[&dyn DynamicPluginLoader],
    artifact: &PluginArtifact,
) -> Result<ArtifactIdentity> {
    for loader in loaders {
        match loader.can_load(artifact).await {
            Ok(Some(identity)) => return Ok(identity),
            Ok(None) => continue,
            Err(Error::PluginSystem(e @ PluginSystemError::InvalidArtifact { .. })) => return Err(e.into()),
            Err(e) => {
                return Err(PluginSystemError::InvalidArtifact {
                    artifact: artifact.file_name(),
                    message: e.to_string(),
                }
                .into());
            }
        }
    }
    Err(PluginSystemError::InvalidArtifact {
        artifact: artifact.file_name(),
        message: "no plugin loader recognizes this artifact".to_string(),
    }
    .into())
}

/// Groups plugins of the same key, oldest version first, keeping first-seen key order.
fn order_batch(batch: &mut [(Plugin, Arc<dyn PluginLoader>)]) {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (index, (plugin, _)) in batch.iter().enumerate() {
        first_seen.entry(plugin.key().to_string()).or_insert(index);
    }
    let position = |plugin: &Plugin| first_seen.get(plugin.key()).copied().unwrap_or(usize::MAX);
    batch.sort_by(|(a, _), (b, _)| {
        position(a)
            .cmp(&position(b))
            .then_with(|| a.version().cmp(b.version()))
    });
}

fn same_artifact(a: &Plugin, b: &Plugin) -> bool {
    matches!((a.artifact(), b.artifact()), (Some(x), Some(y)) if x == y)
}
