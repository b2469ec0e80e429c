//! Subscription management.
//!
//! Id-keyed boxed callbacks, generic over the event type so list, map and
//! scalar notifications all go through the same manager.

use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Manages subscriptions to a stream of events.
pub struct SubscriptionManager<E> {
    subscriptions: HashMap<SubscriptionId, Box<dyn Fn(&E)>>,
    next_id: SubscriptionId,
}

impl<E> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SubscriptionManager<E> {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes with the given callback; returns the id used to
    /// unsubscribe.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, Box::new(callback));
        id
    }

    /// Unsubscribes by id. Returns true if the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Notifies all subscriptions.
    pub fn notify_all(&self, event: &E) {
        for callback in self.subscriptions.values() {
            callback(event);
        }
    }

    /// Returns the number of active subscriptions.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if there are no subscriptions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Returns all subscription ids.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    /// Clears all subscriptions.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}
