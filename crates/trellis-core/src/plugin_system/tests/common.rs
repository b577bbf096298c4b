use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::event::EventDispatcher;
use crate::event::types::{
    PluginDisabledEvent, PluginEnabledEvent, PluginInstalledEvent, PluginModuleDisabledEvent,
    PluginModuleEnabledEvent, PluginUninstalledEvent, PluginUpgradedEvent,
};
use crate::kernel::error::Result;
use crate::plugin_system::descriptor::{ModuleBehavior, ModuleClass, ModuleDescriptor, ModuleDescriptorFactory, ModuleInstance};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{DirectoryPluginLoader, StaticPluginLoader};
use crate::plugin_system::installer::FilePluginInstaller;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::plugin::{ModuleSpec, PluginDescriptor};
use crate::storage::config::ManagerConfig;
use crate::storage::store::MemoryStateStore;

pub const COMPONENT: &str = "component";
pub const SYSTEM_COMPONENT: &str = "system-component";
pub const RESTART_COMPONENT: &str = "restart-component";
pub const BARE: &str = "bare";

/// What a test module materializes into.
#[derive(Debug, PartialEq, Eq)]
pub struct Greeting {
    pub complete_key: String,
}

/// Records hook calls; modules with `fail_enable=true` or `fail_create=true`
/// params fail the matching hook.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ModuleBehavior for Recorder {
    fn create_module(&self, descriptor: &ModuleDescriptor) -> Result<ModuleInstance> {
        self.calls.lock().unwrap().push(format!("create:{}", descriptor.complete_key()));
        if descriptor.param("fail_create") == Some("true") {
            return Err(PluginSystemError::ModuleError {
                module_key: descriptor.complete_key().to_string(),
                message: "cannot create".to_string(),
            }
            .into());
        }
        Ok(Arc::new(Greeting {
            complete_key: descriptor.complete_key().to_string(),
        }))
    }

    fn on_enable(&self, descriptor: &ModuleDescriptor) -> Result<()> {
        if descriptor.param("fail_enable") == Some("true") {
            return Err(PluginSystemError::ModuleError {
                module_key: descriptor.complete_key().to_string(),
                message: "refusing to start".to_string(),
            }
            .into());
        }
        self.calls.lock().unwrap().push(format!("enable:{}", descriptor.complete_key()));
        Ok(())
    }

    fn on_disable(&self, descriptor: &ModuleDescriptor) {
        self.calls.lock().unwrap().push(format!("disable:{}", descriptor.complete_key()));
    }
}

/// Factory with the four test module types wired to `recorder`.
pub fn module_factory(recorder: &Arc<Recorder>) -> Arc<ModuleDescriptorFactory> {
    let component = Arc::new(ModuleClass::new("Component").with_behavior(recorder.clone()));
    let system = Arc::new(
        ModuleClass::new("SystemComponent")
            .with_parent(Arc::clone(&component))
            .cannot_disable(),
    );
    let restart = Arc::new(
        ModuleClass::new("RestartComponent")
            .with_parent(Arc::clone(&component))
            .requires_restart(),
    );
    let factory = ModuleDescriptorFactory::new();
    factory.add_module_descriptor(COMPONENT, component);
    factory.add_module_descriptor(SYSTEM_COMPONENT, system);
    factory.add_module_descriptor(RESTART_COMPONENT, restart);
    factory.add_module_descriptor(BARE, Arc::new(ModuleClass::new("Bare")));
    Arc::new(factory)
}

pub fn descriptor(key: &str, version: &str, modules: &[(&str, &str)]) -> PluginDescriptor {
    modules.iter().fold(PluginDescriptor::new(key, version), |d, (module_key, module_type)| {
        d.with_module(ModuleSpec::new(*module_key, *module_type))
    })
}

pub fn module_with_param(key: &str, module_type: &str, param: &str) -> ModuleSpec {
    let mut spec = ModuleSpec::new(key, module_type);
    spec.params.insert(param.to_string(), "true".to_string());
    spec
}

pub fn write_descriptor(dir: &Path, file_name: &str, descriptor: &PluginDescriptor) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_vec_pretty(descriptor).unwrap()).unwrap();
    path
}

/// Every plugin and module event, as `name:key`, in broadcast order.
pub fn record_events(events: &EventDispatcher) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    macro_rules! record {
        ($ty:ty, $field:ident) => {{
            let seen = Arc::clone(&seen);
            events.subscribe::<$ty, _>(move |event| {
                seen.lock().unwrap().push(format!("{}:{}", crate::event::Event::name(event), event.$field));
                Ok(())
            });
        }};
    }
    record!(PluginEnabledEvent, plugin_key);
    record!(PluginDisabledEvent, plugin_key);
    record!(PluginInstalledEvent, plugin_key);
    record!(PluginUninstalledEvent, plugin_key);
    record!(PluginUpgradedEvent, version);
    record!(PluginModuleEnabledEvent, module_key);
    record!(PluginModuleDisabledEvent, module_key);
    seen
}

pub fn take(seen: &Mutex<Vec<String>>) -> Vec<String> {
    std::mem::take(&mut *seen.lock().unwrap())
}

/// Manager over a static loader and an in-memory store.
pub struct StaticFixture {
    pub manager: PluginManager,
    pub store: Arc<MemoryStateStore>,
    pub recorder: Arc<Recorder>,
}

pub fn static_fixture(descriptors: Vec<PluginDescriptor>) -> StaticFixture {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MemoryStateStore::new());
    let manager = PluginManager::new(ManagerConfig::default(), module_factory(&recorder), store.clone())
        .with_loader(Arc::new(StaticPluginLoader::new(descriptors)));
    StaticFixture { manager, store, recorder }
}

/// Manager over a hot-deploy directory with an installer, and an in-memory store.
pub struct DirectoryFixture {
    pub manager: PluginManager,
    pub store: Arc<MemoryStateStore>,
    pub recorder: Arc<Recorder>,
    pub plugins: tempfile::TempDir,
    pub staging: tempfile::TempDir,
}

pub fn directory_fixture(config: ManagerConfig) -> DirectoryFixture {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MemoryStateStore::new());
    let plugins = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let manager = PluginManager::new(config, module_factory(&recorder), store.clone())
        .with_loader(Arc::new(DirectoryPluginLoader::new(plugins.path())))
        .with_installer(Arc::new(FilePluginInstaller::new(plugins.path())));
    DirectoryFixture { manager, store, recorder, plugins, staging }
}
