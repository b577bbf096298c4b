use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::kernel::error::Result;
use crate::plugin_system::descriptor::{ModuleBehavior, ModuleClass, ModuleDescriptor, ModuleDescriptorFactory, ModuleInstance};
use crate::plugin_system::plugin::{ModuleSpec, PluginDescriptor};
use crate::storage::config::ManagerConfig;

pub const SERVICE: &str = "service";

/// Module object handed out for `service` modules.
#[derive(Debug)]
pub struct Greeter {
    pub greeting: String,
}

struct GreeterBehavior;

impl ModuleBehavior for GreeterBehavior {
    fn create_module(&self, descriptor: &ModuleDescriptor) -> Result<ModuleInstance> {
        let greeting = descriptor.param("greeting").unwrap_or("hello").to_string();
        Ok(Arc::new(Greeter { greeting }))
    }
}

pub fn service_factory() -> Arc<ModuleDescriptorFactory> {
    let factory = ModuleDescriptorFactory::new();
    factory.add_module_descriptor(
        SERVICE,
        Arc::new(ModuleClass::new("Service").with_behavior(Arc::new(GreeterBehavior))),
    );
    Arc::new(factory)
}

pub fn service_plugin(key: &str, version: &str, greeting: &str) -> PluginDescriptor {
    let mut module = ModuleSpec::new("svc", SERVICE);
    module.params.insert("greeting".to_string(), greeting.to_string());
    PluginDescriptor::new(key, version).with_module(module)
}

pub fn write_plugin(dir: &Path, descriptor: &PluginDescriptor) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{}.json", descriptor.key));
    std::fs::write(&path, serde_json::to_vec_pretty(descriptor).unwrap()).unwrap();
    path
}

/// An application layout on disk: bundled and hot-deploy directories plus a state file.
pub struct Layout {
    pub root: TempDir,
}

impl Layout {
    pub fn new() -> Self {
        Self { root: tempfile::tempdir().unwrap() }
    }

    pub fn bundled(&self) -> PathBuf {
        self.root.path().join("bundled")
    }

    pub fn installed(&self) -> PathBuf {
        self.root.path().join("installed")
    }

    pub fn staging(&self) -> PathBuf {
        let dir = self.root.path().join("staging");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn config(&self) -> ManagerConfig {
        ManagerConfig {
            plugin_directory: Some(self.installed()),
            bundled_directory: Some(self.bundled()),
            state_file: self.root.path().join("state").join("plugins.json"),
            container_startup_timeout_ms: 5_000,
            dev_mode: false,
        }
    }
}
