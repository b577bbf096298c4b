use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::error::EventSystemError;
use crate::event::{Event, EventId};
use crate::kernel::error::Result;

/// What a handler returns; an `Err` is logged by the dispatcher.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ErasedHandler = Arc<dyn Fn(&dyn Event) -> HandlerResult + Send + Sync>;

/// A listener subscribes several typed handlers under a single [`EventId`].
pub trait EventListener: Send + Sync {
    fn register_handlers(self: Arc<Self>, handlers: &mut ListenerRegistration);
}

/// Collects the typed handlers of one listener before they are installed.
#[derive(Default)]
pub struct ListenerRegistration {
    handlers: Vec<(TypeId, ErasedHandler)>,
}

impl ListenerRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.push((TypeId::of::<E>(), erase(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn erase<E, F>(handler: F) -> ErasedHandler
where
    E: Event,
    F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(move |event: &dyn Event| match event.as_any().downcast_ref::<E>() {
        Some(typed) => handler(typed),
        None => Ok(()),
    })
}

struct DispatcherInner {
    type_handlers: HashMap<TypeId, Vec<(EventId, ErasedHandler)>>,
    next_handler_id: EventId,
}

/// Typed, synchronous event bus.
///
/// Handler lists are snapshotted before delivery, so a handler may subscribe
/// or unregister while an event is being broadcast; the change applies to the
/// next broadcast.
pub struct EventDispatcher {
    inner: RwLock<DispatcherInner>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let type_handler_count: usize = inner.type_handlers.values().map(|v| v.len()).sum();
        f.debug_struct("EventDispatcher")
            .field("type_handlers_count", &type_handler_count)
            .field("next_handler_id", &inner.next_handler_id)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DispatcherInner {
                type_handlers: HashMap::new(),
                next_handler_id: 1,
            }),
        }
    }

    /// Subscribes `handler` to every broadcast of `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> EventId
    where
        E: Event,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registration = ListenerRegistration::new();
        registration.on::<E, F>(handler);
        self.install(registration)
    }

    /// Installs all handlers of `listener`; they share the returned id.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) -> EventId {
        let mut registration = ListenerRegistration::new();
        listener.register_handlers(&mut registration);
        if registration.is_empty() {
            log::debug!("Registered an event listener without handlers");
        }
        self.install(registration)
    }

    fn install(&self, registration: ListenerRegistration) -> EventId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_handler_id;
        inner.next_handler_id += 1;
        for (type_id, handler) in registration.handlers {
            inner.type_handlers.entry(type_id).or_default().push((id, handler));
        }
        id
    }

    /// Removes every handler registered under `id`.
    pub fn unregister(&self, id: EventId) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut found = false;
        inner.type_handlers.values_mut().for_each(|handlers| {
            let len_before = handlers.len();
            handlers.retain(|(h_id, _)| *h_id != id);
            if handlers.len() < len_before {
                found = true;
            }
        });
        inner.type_handlers.retain(|_, handlers| !handlers.is_empty());
        if found {
            Ok(())
        } else {
            Err(EventSystemError::UnknownHandler { id }.into())
        }
    }

    /// Delivers `event` to the handlers of its concrete type, in registration order.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn broadcast(&self, event: &dyn Event) -> usize {
        let handlers: Vec<ErasedHandler> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            match inner.type_handlers.get(&event.as_any().type_id()) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    let err = EventSystemError::HandlerFailed {
                        event_name: event.name(),
                        reason: e.to_string(),
                    };
                    log::warn!("{}", err);
                }
                Err(payload) => {
                    let err = EventSystemError::HandlerPanicked {
                        event_name: event.name(),
                        message: panic_message(payload.as_ref()),
                    };
                    log::error!("{}", err);
                }
            }
        }
        delivered
    }

    pub fn handler_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.type_handlers.values().map(|v| v.len()).sum()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
