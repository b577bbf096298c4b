pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;

// Re-export key public types/traits for easier use by the binary and embedders
pub use event::{Event, EventDispatcher};
pub use kernel::error::Error as KernelError;
pub use kernel::{ManagerState, Result};
pub use plugin_system::{
    ModuleClass, ModuleDescriptor, ModuleDescriptorFactory, Plugin, PluginDescriptor, PluginManager,
    PluginState,
};
pub use storage::{ManagerConfig, PersistedState, RestartState};

#[cfg(test)]
mod tests;
