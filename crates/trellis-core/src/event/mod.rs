//! # Trellis Core Event System
//!
//! Synchronous, typed publish/subscribe used by the plugin manager to tell
//! the rest of the application about lifecycle changes.
//!
//! Handlers subscribe to a concrete event type (keyed by its `TypeId`) and are
//! invoked in registration order by [`EventDispatcher::broadcast`]. A failing or
//! panicking handler is logged and never reaches the broadcaster.
pub mod dispatcher;
pub mod error;
pub mod types;

use std::any::Any;
use std::fmt;

/// Type for event handler identifiers
pub type EventId = u64;

/// Core event trait
pub trait Event: Any + fmt::Debug + Send + Sync {
    /// Get the name of this event
    fn name(&self) -> &'static str;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Re-export important types
pub use dispatcher::{EventDispatcher, EventListener, HandlerResult, ListenerRegistration};
pub use error::EventSystemError;
pub use types::{
    FrameworkShutdownEvent, FrameworkShuttingDownEvent, FrameworkStartedEvent,
    FrameworkStartingEvent, FrameworkWarmRestartedEvent, FrameworkWarmRestartingEvent,
    PluginDisabledEvent, PluginEnabledEvent, PluginInstalledEvent, PluginModuleDisabledEvent,
    PluginModuleEnabledEvent, PluginUninstalledEvent, PluginUpgradedEvent,
};

// Test module declaration
#[cfg(test)]
mod tests;
