use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::KEY_SEPARATOR;

/// Pending change for a plugin that could not be applied without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestartState {
    #[default]
    None,
    Install,
    Upgrade,
    Remove,
}

impl fmt::Display for RestartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartState::None => "NONE",
            RestartState::Install => "INSTALL",
            RestartState::Upgrade => "UPGRADE",
            RestartState::Remove => "REMOVE",
        };
        f.write_str(label)
    }
}

/// Anything whose enabled flag can be overridden in the persisted state.
pub trait StateEntity {
    /// Plugin key or complete module key.
    fn state_key(&self) -> &str;

    fn is_enabled_by_default(&self) -> bool;
}

/// Immutable snapshot of the administratively set state.
///
/// Only deviations from the default are stored: an enabled override exists
/// only while it differs from the entity's default, and a restart marker only
/// while it is not [`RestartState::None`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    enabled: BTreeMap<String, bool>,
    #[serde(default)]
    restart: BTreeMap<String, RestartState>,
}

impl PersistedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PersistedStateBuilder {
        PersistedStateBuilder::default()
    }

    /// Rebuilds a state from an override map, e.g. one produced by [`Self::get_sub_map`].
    pub fn from_overrides(overrides: BTreeMap<String, bool>) -> Self {
        Self {
            enabled: overrides,
            restart: BTreeMap::new(),
        }
    }

    pub fn to_builder(&self) -> PersistedStateBuilder {
        PersistedStateBuilder {
            draft: self.clone(),
        }
    }

    /// Override if present, else `default_enabled`.
    pub fn is_enabled(&self, key: &str, default_enabled: bool) -> bool {
        self.enabled.get(key).copied().unwrap_or(default_enabled)
    }

    pub fn is_entity_enabled(&self, entity: &dyn StateEntity) -> bool {
        self.is_enabled(entity.state_key(), entity.is_enabled_by_default())
    }

    pub fn overrides(&self) -> &BTreeMap<String, bool> {
        &self.enabled
    }

    /// Standalone copy of the overrides for `plugin_key` and all of its modules.
    pub fn get_sub_map(&self, plugin_key: &str) -> BTreeMap<String, bool> {
        self.enabled
            .iter()
            .filter(|(key, _)| belongs_to_plugin(key, plugin_key))
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    pub fn get_restart_state(&self, plugin_key: &str) -> RestartState {
        self.restart.get(plugin_key).copied().unwrap_or_default()
    }

    pub fn restart_states(&self) -> impl Iterator<Item = (&str, RestartState)> {
        self.restart.iter().map(|(key, state)| (key.as_str(), *state))
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.restart.is_empty()
    }
}

/// Mutable draft of a [`PersistedState`].
#[derive(Debug, Clone, Default)]
pub struct PersistedStateBuilder {
    draft: PersistedState,
}

impl PersistedStateBuilder {
    /// Records `value` for `key`; a value equal to the default deletes the override.
    pub fn set_enabled(&mut self, key: &str, default_enabled: bool, value: bool) -> &mut Self {
        if value == default_enabled {
            self.draft.enabled.remove(key);
        } else {
            self.draft.enabled.insert(key.to_string(), value);
        }
        self
    }

    pub fn set_entity_enabled(&mut self, entity: &dyn StateEntity, value: bool) -> &mut Self {
        self.set_enabled(entity.state_key(), entity.is_enabled_by_default(), value)
    }

    pub fn add_overrides(&mut self, overrides: &BTreeMap<String, bool>) -> &mut Self {
        self.draft
            .enabled
            .extend(overrides.iter().map(|(key, value)| (key.clone(), *value)));
        self
    }

    pub fn set_restart_state(&mut self, plugin_key: &str, state: RestartState) -> &mut Self {
        if state == RestartState::None {
            self.draft.restart.remove(plugin_key);
        } else {
            self.draft.restart.insert(plugin_key.to_string(), state);
        }
        self
    }

    pub fn clear_all_restart_states(&mut self) -> &mut Self {
        self.draft.restart.clear();
        self
    }

    /// Drops the plugin's and its modules' overrides so a reinstall starts from defaults.
    pub fn remove_all_state_for(&mut self, plugin_key: &str) -> &mut Self {
        self.draft
            .enabled
            .retain(|key, _| !belongs_to_plugin(key, plugin_key));
        self
    }

    pub fn to_state(&self) -> PersistedState {
        self.draft.clone()
    }
}

fn belongs_to_plugin(key: &str, plugin_key: &str) -> bool {
    match key.strip_prefix(plugin_key) {
        Some("") => true,
        Some(rest) => rest.starts_with(KEY_SEPARATOR),
        None => false,
    }
}
