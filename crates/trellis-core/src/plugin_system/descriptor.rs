//! Module classes, module descriptors and the factory that maps descriptor
//! type tags to classes.
//!
//! A [`ModuleClass`] is a named node in a single-inheritance chain. The two
//! capability flags, cannot-disable and requires-restart, are inherited along
//! that chain; they are resolved once, when a [`ModuleDescriptor`] is built,
//! and stored on the descriptor.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::kernel::constants::KEY_SEPARATOR;
use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::ModuleSpec;
use crate::storage::state::StateEntity;

/// The object a module descriptor materializes into.
pub type ModuleInstance = Arc<dyn Any + Send + Sync>;

/// What a module class does when its modules are created, enabled and disabled.
pub trait ModuleBehavior: Send + Sync {
    fn create_module(&self, descriptor: &ModuleDescriptor) -> Result<ModuleInstance>;

    /// Called before the module is marked enabled; an error keeps it disabled.
    fn on_enable(&self, _descriptor: &ModuleDescriptor) -> Result<()> {
        Ok(())
    }

    fn on_disable(&self, _descriptor: &ModuleDescriptor) {}
}

pub struct ModuleClass {
    name: String,
    parent: Option<Arc<ModuleClass>>,
    declares_cannot_disable: bool,
    declares_requires_restart: bool,
    behavior: Option<Arc<dyn ModuleBehavior>>,
}

impl fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("cannot_disable", &self.declares_cannot_disable)
            .field("requires_restart", &self.declares_requires_restart)
            .finish_non_exhaustive()
    }
}

impl ModuleClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            declares_cannot_disable: false,
            declares_requires_restart: false,
            behavior: None,
        }
    }

    pub fn with_parent(mut self, parent: Arc<ModuleClass>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_behavior(mut self, behavior: Arc<dyn ModuleBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Declares the cannot-disable capability for this class and its subclasses.
    pub fn cannot_disable(mut self) -> Self {
        self.declares_cannot_disable = true;
        self
    }

    /// Declares the requires-restart capability for this class and its subclasses.
    pub fn requires_restart(mut self) -> Self {
        self.declares_requires_restart = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ModuleClass>> {
        self.parent.as_ref()
    }

    /// This class followed by its ancestors, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = &ModuleClass> {
        std::iter::successors(Some(self), |class| class.parent.as_deref())
    }

    pub fn is_subclass_of(&self, class_name: &str) -> bool {
        self.lineage().any(|class| class.name == class_name)
    }

    pub fn inherits_cannot_disable(&self) -> bool {
        self.lineage().any(|class| class.declares_cannot_disable)
    }

    pub fn inherits_requires_restart(&self) -> bool {
        self.lineage().any(|class| class.declares_requires_restart)
    }

    /// Nearest behavior along the chain.
    pub fn behavior(&self) -> Option<&Arc<dyn ModuleBehavior>> {
        self.lineage().find_map(|class| class.behavior.as_ref())
    }
}

/// One addressable module of a plugin, keyed `pluginKey:moduleKey`.
pub struct ModuleDescriptor {
    key: String,
    complete_key: String,
    plugin_key: String,
    name: Option<String>,
    module_type: String,
    class: Arc<ModuleClass>,
    params: BTreeMap<String, String>,
    enabled_by_default: bool,
    cannot_disable: bool,
    requires_restart: bool,
    enabled: AtomicBool,
    instance: Mutex<Option<ModuleInstance>>,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("complete_key", &self.complete_key)
            .field("module_type", &self.module_type)
            .field("class", &self.class.name())
            .field("enabled", &self.is_enabled())
            .field("cannot_disable", &self.cannot_disable)
            .field("requires_restart", &self.requires_restart)
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    pub fn new(
        plugin_key: &str,
        key: &str,
        module_type: &str,
        class: Arc<ModuleClass>,
    ) -> Self {
        Self {
            key: key.to_string(),
            complete_key: format!("{}{}{}", plugin_key, KEY_SEPARATOR, key),
            plugin_key: plugin_key.to_string(),
            name: None,
            module_type: module_type.to_string(),
            cannot_disable: class.inherits_cannot_disable(),
            requires_restart: class.inherits_requires_restart(),
            class,
            params: BTreeMap::new(),
            enabled_by_default: true,
            enabled: AtomicBool::new(false),
            instance: Mutex::new(None),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn complete_key(&self) -> &str {
        &self.complete_key
    }

    pub fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    /// Type tag the descriptor was declared with.
    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn class(&self) -> &Arc<ModuleClass> {
        &self.class
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    pub fn is_cannot_disable(&self) -> bool {
        self.cannot_disable
    }

    pub fn is_requires_restart(&self) -> bool {
        self.requires_restart
    }

    /// Whether the module is currently running. Says nothing about its plugin.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// The module object, created through the class behavior on first use.
    pub fn module(&self) -> Result<ModuleInstance> {
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }
        let behavior = self.class.behavior().ok_or_else(|| PluginSystemError::ModuleError {
            module_key: self.complete_key.clone(),
            message: format!("module class '{}' has no behavior", self.class.name()),
        })?;
        let instance = behavior.create_module(self)?;
        *slot = Some(Arc::clone(&instance));
        Ok(instance)
    }

    pub fn has_module_instance(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn clear_module(&self) {
        *self.instance.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn run_enable_hook(&self) -> Result<()> {
        match self.class.behavior() {
            Some(behavior) => behavior.on_enable(self),
            None => Ok(()),
        }
    }

    pub(crate) fn run_disable_hook(&self) {
        if let Some(behavior) = self.class.behavior() {
            behavior.on_disable(self);
        }
    }
}

impl StateEntity for ModuleDescriptor {
    fn state_key(&self) -> &str {
        &self.complete_key
    }

    fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }
}

/// Registry of module classes keyed by descriptor type tag.
#[derive(Default)]
pub struct ModuleDescriptorFactory {
    classes: RwLock<HashMap<String, Arc<ModuleClass>>>,
}

impl fmt::Debug for ModuleDescriptorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<&String> = classes.keys().collect();
        tags.sort();
        f.debug_struct("ModuleDescriptorFactory").field("types", &tags).finish()
    }
}

impl ModuleDescriptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `module_type` to `class`, replacing any previous mapping.
    pub fn add_module_descriptor(&self, module_type: impl Into<String>, class: Arc<ModuleClass>) {
        let module_type = module_type.into();
        log::debug!("Registering module type '{}' -> class '{}'", module_type, class.name());
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module_type, class);
    }

    pub fn remove_module_descriptor(&self, module_type: &str) -> Option<Arc<ModuleClass>> {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module_type)
    }

    pub fn has_module_descriptor(&self, module_type: &str) -> bool {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module_type)
    }

    pub fn get_module_class(&self, module_type: &str) -> Option<Arc<ModuleClass>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_type)
            .cloned()
    }

    /// Builds the descriptor for one declared module of `plugin_key`.
    pub fn create_descriptor(&self, plugin_key: &str, spec: &ModuleSpec) -> Result<ModuleDescriptor> {
        let class = self.get_module_class(&spec.module_type).ok_or_else(|| {
            PluginSystemError::UnknownModuleType {
                module_key: format!("{}{}{}", plugin_key, KEY_SEPARATOR, spec.key),
                module_type: spec.module_type.clone(),
            }
        })?;
        let mut descriptor = ModuleDescriptor::new(plugin_key, &spec.key, &spec.module_type, class)
            .with_params(spec.params.clone())
            .enabled_by_default(spec.enabled_by_default);
        if let Some(name) = &spec.name {
            descriptor = descriptor.with_name(name.clone());
        }
        Ok(descriptor)
    }
}
