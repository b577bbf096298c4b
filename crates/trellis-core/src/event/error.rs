//! # Trellis Core Event System Errors
//!
//! [`EventSystemError`] covers what can go wrong around the dispatcher:
//! handlers that fail or panic while an event is broadcast, and
//! unregistration of unknown handler ids.
use crate::event::EventId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Event handler failed while handling '{event_name}': {reason}")]
    HandlerFailed {
        event_name: &'static str,
        reason: String,
    },

    #[error("Event handler panicked while handling '{event_name}': {message}")]
    HandlerPanicked {
        event_name: &'static str,
        message: String,
    },

    #[error("Failed to unregister event handler with ID {id}: no such handler")]
    UnknownHandler { id: EventId },
}
