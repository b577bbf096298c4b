//! Events broadcast by the framework and the plugin manager.
use std::any::Any;

use crate::event::Event;

macro_rules! impl_event {
    ($ty:ty, $name:literal) => {
        impl Event for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// `init()` has begun.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkStartingEvent;
impl_event!(FrameworkStartingEvent, "framework.starting");

/// Every loader has been consulted and the enabled set is up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkStartedEvent;
impl_event!(FrameworkStartedEvent, "framework.started");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkShuttingDownEvent;
impl_event!(FrameworkShuttingDownEvent, "framework.shutting_down");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkShutdownEvent;
impl_event!(FrameworkShutdownEvent, "framework.shutdown");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkWarmRestartingEvent;
impl_event!(FrameworkWarmRestartingEvent, "framework.warm_restarting");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkWarmRestartedEvent;
impl_event!(FrameworkWarmRestartedEvent, "framework.warm_restarted");

/// A plugin and all of its enabled modules are up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnabledEvent {
    pub plugin_key: String,
}
impl_event!(PluginEnabledEvent, "plugin.enabled");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDisabledEvent {
    pub plugin_key: String,
}
impl_event!(PluginDisabledEvent, "plugin.disabled");

/// A plugin that was not known before has been registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInstalledEvent {
    pub plugin_key: String,
}
impl_event!(PluginInstalledEvent, "plugin.installed");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUninstalledEvent {
    pub plugin_key: String,
}
impl_event!(PluginUninstalledEvent, "plugin.uninstalled");

/// A running plugin was replaced by a strictly newer artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpgradedEvent {
    pub plugin_key: String,
    pub previous_version: String,
    pub version: String,
}
impl_event!(PluginUpgradedEvent, "plugin.upgraded");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginModuleEnabledEvent {
    pub plugin_key: String,
    /// Complete key, `pluginKey:moduleKey`.
    pub module_key: String,
}
impl_event!(PluginModuleEnabledEvent, "plugin.module.enabled");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginModuleDisabledEvent {
    pub plugin_key: String,
    /// Complete key, `pluginKey:moduleKey`.
    pub module_key: String,
}
impl_event!(PluginModuleDisabledEvent, "plugin.module.disabled");

impl PluginEnabledEvent {
    pub fn new(plugin_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into() }
    }
}

impl PluginDisabledEvent {
    pub fn new(plugin_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into() }
    }
}

impl PluginInstalledEvent {
    pub fn new(plugin_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into() }
    }
}

impl PluginUninstalledEvent {
    pub fn new(plugin_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into() }
    }
}

impl PluginModuleEnabledEvent {
    pub fn new(plugin_key: impl Into<String>, module_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into(), module_key: module_key.into() }
    }
}

impl PluginModuleDisabledEvent {
    pub fn new(plugin_key: impl Into<String>, module_key: impl Into<String>) -> Self {
        Self { plugin_key: plugin_key.into(), module_key: module_key.into() }
    }
}
