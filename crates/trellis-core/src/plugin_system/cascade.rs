//! Dependency ordering and module enable/disable mechanics.
//!
//! The ordering functions work on a registry snapshot and never touch plugin
//! state. The module functions flip module flags, run class hooks and fire
//! module events; they never take the registry lock.
use std::collections::{HashMap, HashSet, VecDeque};

use crate::event::EventDispatcher;
use crate::event::types::{PluginModuleDisabledEvent, PluginModuleEnabledEvent};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::descriptor::ModuleDescriptor;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::Plugin;
use crate::plugin_system::registry::PluginRegistry;
use crate::storage::state::PersistedState;

/// Required plugins of `key`, transitively and deepest first, followed by `key`.
///
/// Fails if a required plugin is not registered or is unloadable.
pub fn enable_order(registry: &PluginRegistry, key: &str) -> Result<Vec<String>> {
    fn visit(
        registry: &PluginRegistry,
        key: &str,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if !visited.insert(key.to_string()) {
            return Ok(());
        }
        let plugin = registry
            .get_plugin(key)
            .ok_or_else(|| PluginSystemError::PluginNotFound(key.to_string()))?;
        for dependency in plugin.required_plugins() {
            match registry.get_plugin(dependency) {
                Some(dep) if !dep.is_unloadable() => visit(registry, dependency, visited, order)?,
                _ => {
                    return Err(PluginSystemError::MissingDependency {
                        plugin_key: key.to_string(),
                        dependency: dependency.clone(),
                    }
                    .into());
                }
            }
        }
        order.push(key.to_string());
        Ok(())
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(registry, key, &mut visited, &mut order)?;
    Ok(order)
}

/// Registered plugins requiring `key`, transitively and deepest first, followed by `key`.
pub fn disable_order(registry: &PluginRegistry, key: &str) -> Vec<String> {
    fn visit(registry: &PluginRegistry, key: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(key.to_string()) {
            return;
        }
        for dependent in registry.direct_dependents(key) {
            visit(registry, &dependent, visited, order);
        }
        order.push(key.to_string());
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(registry, key, &mut visited, &mut order);
    order
}

/// Transitive dependents of `key`, deepest first.
pub fn dependents_of(registry: &PluginRegistry, key: &str) -> Vec<String> {
    let mut order = disable_order(registry, key);
    order.pop();
    order
}

/// Transitive registered dependencies of `key`, deepest first. Missing ones are skipped.
pub fn dependencies_of(registry: &PluginRegistry, key: &str) -> Vec<String> {
    fn visit(registry: &PluginRegistry, key: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(key.to_string()) {
            return;
        }
        if let Some(plugin) = registry.get_plugin(key) {
            for dependency in plugin.required_plugins() {
                if registry.has_plugin(dependency) {
                    visit(registry, dependency, visited, order);
                }
            }
        }
        order.push(key.to_string());
    }

    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(registry, key, &mut visited, &mut order);
    order.pop();
    order
}

/// Every registered plugin, dependencies before dependents (Kahn's algorithm).
///
/// Plugins caught in a cycle cannot be ordered; they are appended in
/// registration order.
pub fn startup_order(registry: &PluginRegistry) -> Vec<String> {
    let keys = registry.keys();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for key in keys {
        in_degree.entry(key.as_str()).or_insert(0);
        if let Some(plugin) = registry.get(key).map(|entry| &entry.plugin) {
            for dependency in plugin.required_plugins() {
                if registry.has_plugin(dependency) {
                    *in_degree.entry(key.as_str()).or_insert(0) += 1;
                    dependents.entry(dependency.as_str()).or_default().push(key.as_str());
                }
            }
        }
    }

    let mut queue: VecDeque<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|key| in_degree.get(key).copied().unwrap_or(0) == 0)
        .collect();
    let mut sorted: Vec<String> = Vec::with_capacity(keys.len());
    while let Some(key) = queue.pop_front() {
        sorted.push(key.to_string());
        for dependent in dependents.get(key).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if sorted.len() < keys.len() {
        let placed: HashSet<String> = sorted.iter().cloned().collect();
        let cyclic: Vec<String> = keys.iter().filter(|k| !placed.contains(*k)).cloned().collect();
        log::warn!("Cyclic plugin dependencies between {:?}; starting them in registration order", cyclic);
        sorted.extend(cyclic);
    }
    sorted
}

/// A module whose enable hook failed.
#[derive(Debug)]
pub(crate) struct ModuleEnableFailure {
    pub module_key: String,
    pub error: Error,
}

/// Enables, in declaration order, the modules of `plugin` that `state` has enabled.
///
/// If a hook fails, the modules enabled so far are torn down again (their
/// disabled events fire) and the failure is returned.
pub(crate) fn enable_modules(
    plugin: &Plugin,
    state: &PersistedState,
    events: &EventDispatcher,
) -> std::result::Result<usize, ModuleEnableFailure> {
    let mut enabled = 0;
    for module in plugin.modules() {
        if module.is_enabled() || !state.is_entity_enabled(module.as_ref()) {
            continue;
        }
        if let Err(error) = enable_module(module, events) {
            log::error!("Enabling module '{}' failed: {}", module.complete_key(), error);
            disable_modules(plugin, events);
            return Err(ModuleEnableFailure {
                module_key: module.complete_key().to_string(),
                error,
            });
        }
        enabled += 1;
    }
    Ok(enabled)
}

/// Disables every enabled module of `plugin` in reverse declaration order,
/// cannot-disable ones included.
pub(crate) fn disable_modules(plugin: &Plugin, events: &EventDispatcher) -> usize {
    plugin
        .modules()
        .iter()
        .rev()
        .filter(|module| disable_module(module, events))
        .count()
}

pub(crate) fn enable_module(module: &ModuleDescriptor, events: &EventDispatcher) -> Result<()> {
    if module.is_enabled() {
        return Ok(());
    }
    module.run_enable_hook()?;
    module.set_enabled(true);
    log::debug!("Enabled module '{}'", module.complete_key());
    events.broadcast(&PluginModuleEnabledEvent::new(module.plugin_key(), module.complete_key()));
    Ok(())
}

/// Returns whether the module was running.
pub(crate) fn disable_module(module: &ModuleDescriptor, events: &EventDispatcher) -> bool {
    if !module.is_enabled() {
        return false;
    }
    module.run_disable_hook();
    module.set_enabled(false);
    module.clear_module();
    log::debug!("Disabled module '{}'", module.complete_key());
    events.broadcast(&PluginModuleDisabledEvent::new(module.plugin_key(), module.complete_key()));
    true
}
