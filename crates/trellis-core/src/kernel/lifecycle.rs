use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::kernel::error::{Error, Result};

/// Lifecycle states of the plugin manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    NotStarted,
    Starting,
    Started,
    WarmRestarting,
    ShuttingDown,
    Shutdown,
}

impl ManagerState {
    /// States reachable from `self` in one step.
    fn successors(self) -> &'static [ManagerState] {
        use ManagerState::*;
        match self {
            NotStarted => &[Starting],
            // A failed init may still be shut down.
            Starting => &[Started, ShuttingDown],
            Started => &[ShuttingDown, WarmRestarting],
            WarmRestarting => &[Started],
            ShuttingDown => &[Shutdown],
            Shutdown => &[Starting],
        }
    }

    pub fn can_transition_to(self, next: ManagerState) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManagerState::NotStarted => "NOT_STARTED",
            ManagerState::Starting => "STARTING",
            ManagerState::Started => "STARTED",
            ManagerState::WarmRestarting => "WARM_RESTARTING",
            ManagerState::ShuttingDown => "SHUTTING_DOWN",
            ManagerState::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

/// Single authoritative holder of the manager's lifecycle state.
///
/// Every transition is checked against a fixed table; anything not in the
/// table (self-loops included) is rejected with [`Error::IllegalState`].
#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<ManagerState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState::NotStarted),
        }
    }

    pub fn get(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next`, returning the previous state.
    pub fn set_state(&self, next: ManagerState) -> Result<ManagerState> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *guard;
        if !current.can_transition_to(next) {
            return Err(Error::IllegalState {
                current,
                requested: next,
            });
        }
        log::debug!("Plugin manager state {} -> {}", current, next);
        *guard = next;
        Ok(current)
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
