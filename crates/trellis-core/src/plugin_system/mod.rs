//! # Trellis Core Plugin System
//!
//! Everything needed to discover plugins, keep them in a registry and move
//! them and their modules between enabled and disabled, including hot
//! install, upgrade and uninstall.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`manager`]**: The central orchestrator ([`PluginManager`]). Owns the
//!   registry, the loaders and the persisted state, and runs every lifecycle
//!   operation.
//! - **[`plugin`]**: The [`Plugin`] type, its runtime [`PluginState`] and the
//!   declarative [`PluginDescriptor`] plugins are built from.
//! - **[`descriptor`]**: Module classes (single-inheritance chains carrying the
//!   cannot-disable and requires-restart capabilities), module descriptors and
//!   the [`ModuleDescriptorFactory`] resolving type tags to classes.
//! - **[`loader`]**: The [`PluginLoader`](loader::PluginLoader) seam plus the
//!   directory, bundled and static loaders.
//! - **[`installer`]**: Copies accepted artifacts into the hot-deploy directory.
//! - **[`cascade`]**: Dependency ordering for enable/disable cascades and
//!   startup, and the module enable/disable mechanics.
//! - **[`registry`]**: Keyed, ordered storage of registered plugins.
//! - **[`container`]**: Readiness of a plugin's runtime container.
//! - **[`version`]**: Plugin version ordering.
//! - **[`error`]**: [`PluginSystemError`](error::PluginSystemError).
pub mod cascade;
pub mod container;
pub mod descriptor;
pub mod error;
pub mod installer;
pub mod loader;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod version;

pub use container::{PluginContainer, StartupGate};
pub use descriptor::{ModuleBehavior, ModuleClass, ModuleDescriptor, ModuleDescriptorFactory, ModuleInstance};
pub use error::PluginSystemError;
pub use installer::{FilePluginInstaller, PluginInstaller};
pub use loader::{BundledPluginLoader, DirectoryPluginLoader, PluginLoader, StaticPluginLoader};
pub use manager::PluginManager;
pub use plugin::{ModuleSpec, Plugin, PluginArtifact, PluginDescriptor, PluginInformation, PluginState};
pub use registry::PluginRegistry;
pub use version::PluginVersion;

#[cfg(test)]
mod tests;
