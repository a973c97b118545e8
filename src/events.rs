//! Publish/subscribe surface for server observers.
//!
//! Dashboards and loggers register callbacks per [`Topic`]; the server
//! publishes a fresh snapshot whenever the client table, the type table or
//! the debug-command list changes. Nothing inside the core subscribes.
//!
//! Callbacks run synchronously on the task that caused the change and must
//! be fast. They are invoked outside the bus lock, so a callback may
//! subscribe or unsubscribe without deadlocking.
//!
//! ```ignore
//! let sub = server.events().subscribe(Topic::ClientsUpdated, |event| {
//!     if let ServerEvent::ClientsUpdated(clients) = event {
//!         log::info!("{} clients connected", clients.len());
//!     }
//! });
//! server.events().unsubscribe(&sub);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client_types::ClientTypes;
use crate::server::session::ClientSnapshot;

/// Unique identifier for a subscription.
pub type SubscriptionId = String;

/// What an observer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A session connected, disconnected, or changed its type or id.
    ClientsUpdated,
    /// The type table changed.
    TypesUpdated,
    /// The debug-command list changed.
    DebugCommandsUpdated,
}

/// A change notification carrying the new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Every live session, sorted by short id.
    ClientsUpdated(Vec<ClientSnapshot>),
    /// The full type table.
    TypesUpdated(ClientTypes),
    /// The full debug-command list.
    DebugCommandsUpdated(Vec<String>),
}

impl ServerEvent {
    /// Topic this event is published under.
    pub fn topic(&self) -> Topic {
        match self {
            Self::ClientsUpdated(_) => Topic::ClientsUpdated,
            Self::TypesUpdated(_) => Topic::TypesUpdated,
            Self::DebugCommandsUpdated(_) => Topic::DebugCommandsUpdated,
        }
    }
}

type Callback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    /// Topic -> list of (subscription_id, callback).
    callbacks: HashMap<Topic, Vec<(SubscriptionId, Callback)>>,
    /// Counter for generating unique subscription IDs.
    next_id: u64,
}

/// Callback registry keyed by [`Topic`].
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Subscriptions>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("total_callbacks", &self.callback_count())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`.
    ///
    /// Returns an id for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let Ok(mut inner) = self.inner.lock() else {
            log::error!("[Events] Subscription table poisoned, dropping subscriber");
            return String::new();
        };

        let id = format!("evt_{}", inner.next_id);
        inner.next_id += 1;
        inner
            .callbacks
            .entry(topic)
            .or_default()
            .push((id.clone(), Arc::new(callback)));

        log::debug!("[Events] Registered '{}' for {:?}", id, topic);
        id
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        let mut removed = false;
        for callbacks in inner.callbacks.values_mut() {
            if let Some(idx) = callbacks.iter().position(|(id, _)| id == subscription_id) {
                callbacks.remove(idx);
                removed = true;
            }
        }
        if removed {
            log::debug!("[Events] Unregistered '{}'", subscription_id);
        }
        removed
    }

    /// Publish `event` to every subscriber of its topic.
    ///
    /// Returns how many callbacks ran.
    pub fn notify(&self, event: &ServerEvent) -> usize {
        let callbacks: Vec<Callback> = match self.inner.lock() {
            Ok(inner) => inner
                .callbacks
                .get(&event.topic())
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default(),
            Err(_) => return 0,
        };

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Total number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.callbacks.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}
