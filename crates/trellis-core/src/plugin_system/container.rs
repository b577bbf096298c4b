use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

/// Runtime container a plugin's code lives in.
///
/// Enabling a plugin that carries a container waits for it to report started,
/// bounded by the manager's container startup timeout.
#[async_trait]
pub trait PluginContainer: Send + Sync + fmt::Debug {
    fn is_started(&self) -> bool;

    /// Resolves once the container is started. May never resolve.
    async fn wait_until_started(&self);
}

/// A container that starts when told to, or once a deadline passes.
pub struct StartupGate {
    started: watch::Sender<bool>,
    deadline: Option<Instant>,
}

impl fmt::Debug for StartupGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupGate")
            .field("started", &self.is_started())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl StartupGate {
    /// Not started until [`mark_started`](Self::mark_started) is called.
    pub fn new() -> Self {
        let (started, _) = watch::channel(false);
        Self { started, deadline: None }
    }

    pub fn started() -> Self {
        let gate = Self::new();
        gate.mark_started();
        gate
    }

    /// Starts by itself `delay` after construction.
    pub fn delayed(delay: Duration) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            started,
            deadline: Some(Instant::now() + delay),
        }
    }

    pub fn mark_started(&self) {
        self.started.send_replace(true);
    }
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginContainer for StartupGate {
    fn is_started(&self) -> bool {
        *self.started.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn wait_until_started(&self) {
        let mut receiver = self.started.subscribe();
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = receiver.wait_for(|started| *started) => {}
                }
            }
            None => {
                // Err only when the sender is dropped, which cannot happen while `self` lives.
                let _ = receiver.wait_for(|started| *started).await;
            }
        }
    }
}
