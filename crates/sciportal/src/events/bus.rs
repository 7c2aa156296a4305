//! Synchronous publish/subscribe bus for lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, trace};
use tokio::sync::mpsc;

use super::types::PortalEvent;

type Callback = Arc<dyn Fn(&PortalEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event bus delivering [`PortalEvent`]s to subscribers.
///
/// Delivery is synchronous and in subscription order. Publishes are
/// serialized, so every subscriber observes events in the same order.
/// Callbacks must not publish on the bus they are subscribed to.
#[derive(Default)]
pub struct EventBus {
    /// Subscribers in subscription order.
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,

    /// Held for the duration of one delivery.
    delivery: Mutex<()>,

    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every published event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PortalEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        debug!("Registered event subscriber {:?}", id);
        id
    }

    /// Forward every event into an unbounded channel.
    ///
    /// Events published after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<PortalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |event| {
            if tx.send(event.clone()).is_err() {
                trace!("Dropping {} for closed channel subscriber", event.topic());
            }
        });
        rx
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        before != subscribers.len()
    }

    /// Deliver an event to every subscriber.
    pub fn publish(&self, event: PortalEvent) {
        let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        trace!("Publishing {} to {} subscriber(s)", event.topic(), callbacks.len());
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
