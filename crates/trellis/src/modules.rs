//! Module types understood by the command-line host.
//!
//! The host has no code of its own to run for a plugin; its modules
//! materialize into a [`Component`] that only records its key and params.
use std::collections::BTreeMap;
use std::sync::Arc;

use trellis_core::plugin_system::{ModuleBehavior, ModuleInstance};
use trellis_core::{ModuleClass, ModuleDescriptor, ModuleDescriptorFactory, Result};

pub const COMPONENT: &str = "component";
pub const SYSTEM_COMPONENT: &str = "system-component";
pub const RESTART_COMPONENT: &str = "restart-component";

#[derive(Debug)]
#[allow(dead_code)] // Handed out as a module object; the host never reads it back.
pub struct Component {
    pub complete_key: String,
    pub params: BTreeMap<String, String>,
}

struct ComponentBehavior;

impl ModuleBehavior for ComponentBehavior {
    fn create_module(&self, descriptor: &ModuleDescriptor) -> Result<ModuleInstance> {
        Ok(Arc::new(Component {
            complete_key: descriptor.complete_key().to_string(),
            params: descriptor.params().clone(),
        }))
    }

    fn on_enable(&self, descriptor: &ModuleDescriptor) -> Result<()> {
        log::debug!("Component '{}' up", descriptor.complete_key());
        Ok(())
    }

    fn on_disable(&self, descriptor: &ModuleDescriptor) {
        log::debug!("Component '{}' down", descriptor.complete_key());
    }
}

pub fn module_factory() -> Arc<ModuleDescriptorFactory> {
    let component = Arc::new(ModuleClass::new("Component").with_behavior(Arc::new(ComponentBehavior)));
    let system = ModuleClass::new("SystemComponent")
        .with_parent(Arc::clone(&component))
        .cannot_disable();
    let restart = ModuleClass::new("RestartComponent")
        .with_parent(Arc::clone(&component))
        .requires_restart();

    let factory = ModuleDescriptorFactory::new();
    factory.add_module_descriptor(COMPONENT, component);
    factory.add_module_descriptor(SYSTEM_COMPONENT, Arc::new(system));
    factory.add_module_descriptor(RESTART_COMPONENT, Arc::new(restart));
    Arc::new(factory)
}
