//! Typed publish/subscribe registry for runner events.
//!
//! Subscribers register an owned handler per [`EventKind`]. Publishing an
//! event invokes every handler registered for its kind, in registration
//! order. Handlers run synchronously on the publishing task and must not
//! block; the session forwards into its own channel and returns.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::daemon::events::{DaemonEvent, EventKind};

/// Boxed subscriber callback.
pub type Handler = Box<dyn Fn(&DaemonEvent) + Send + Sync>;

/// Cheaply cloneable event registry shared by the driver and its subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Handler>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventBus {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future event of `kind`.
    pub fn register_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&DaemonEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Deliver `event` to its subscribers. Returns how many were invoked.
    pub fn publish(&self, event: &DaemonEvent) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = handlers.get(&event.kind()) else {
            return 0;
        };
        for handler in subscribers {
            handler(event);
        }
        subscribers.len()
    }

    /// Total registered handlers across all kinds.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}
