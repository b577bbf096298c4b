/// Application name
pub const APP_NAME: &str = "Trellis";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Separator between the plugin key and the module key in a complete key
pub const KEY_SEPARATOR: char = ':';

/// Default plugins directory
pub const DEFAULT_PLUGINS_DIR: &str = "plugins/installed";

/// Default persisted state file
pub const DEFAULT_STATE_FILE: &str = "plugin-state.json";

/// Default time an install waits for a plugin container to start
pub const DEFAULT_CONTAINER_STARTUP_TIMEOUT_MS: u64 = 30_000;

/// Descriptor format version written by current tooling
pub const CURRENT_PLUGINS_VERSION: u32 = 2;
