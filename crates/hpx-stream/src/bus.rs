//! Publish/subscribe surface of a stream instance.
//!
//! Every lifecycle and data notification passes through an [`EventBus`].
//! Handlers are invoked synchronously, in registration order, on the task
//! that publishes the event.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use crate::types::{EventKind, StreamEvent};

/// Callback registered for one [`EventKind`].
pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Identifies one registration on an [`EventBus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
    /// Owned by a pull bridge; not carried over by [`EventBus::duplicate`].
    bridged: bool,
}

/// Event bus owned by a stream instance.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.insert(kind, handler, false)
    }

    pub(crate) fn subscribe_bridge(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.insert(kind, handler, true)
    }

    fn insert(&self, kind: EventKind, handler: EventHandler, bridged: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            handler,
            bridged,
        });
        id
    }

    /// Remove one registration.
    ///
    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Remove every registration, bridges included.
    pub fn unsubscribe_all(&self) {
        // Handlers are dropped outside the lock.
        let removed = std::mem::take(&mut *self.subscriptions.write());
        drop(removed);
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Returns the number of handlers invoked. Handlers may subscribe or
    /// unsubscribe while being called; such changes apply to the next event.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// A new bus holding the same handlers under the same ids.
    ///
    /// Bridge registrations stay with the bus that owns their iterator.
    pub fn duplicate(&self) -> EventBus {
        let subscriptions = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| !s.bridged)
            .map(|s| Subscription {
                id: s.id,
                kind: s.kind,
                handler: Arc::clone(&s.handler),
                bridged: false,
            })
            .collect();

        EventBus {
            subscriptions: RwLock::new(subscriptions),
            next_id: AtomicU64::new(self.next_id.load(Ordering::Relaxed)),
        }
    }
}
