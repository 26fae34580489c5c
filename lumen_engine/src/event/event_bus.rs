/// Typed publish/subscribe registry
///
/// Maps each event type to an ordered list of `(subscriber, priority, callback)`
/// entries. Publishing walks the list High → Normal → Low, in subscription
/// order within a priority. Handlers must not publish re-entrantly on the same
/// bus; they typically enqueue work for the owner to process.

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};

use super::events::Event;

/// Identity of a subscriber, used to remove all of its registrations at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Dispatch priority; `High` handlers run first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

struct Subscription {
    subscriber: SubscriberId,
    priority: Priority,
    callback: Box<dyn FnMut(&dyn Any)>,
}

/// Event registry
#[derive(Default)]
pub struct EventBus {
    subscriptions: FxHashMap<TypeId, Vec<Subscription>>,
    next_subscriber: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh subscriber identity
    pub fn register_subscriber(&mut self) -> SubscriberId {
        self.next_subscriber += 1;
        SubscriberId(self.next_subscriber)
    }

    /// Register `handler` for events of type `E`
    pub fn subscribe<E, F>(&mut self, subscriber: SubscriberId, priority: Priority, mut handler: F)
    where
        E: Event,
        F: FnMut(&E) + 'static,
    {
        let callback = Box::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });

        let list = self.subscriptions.entry(TypeId::of::<E>()).or_default();
        let position = list
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(list.len());
        list.insert(position, Subscription { subscriber, priority, callback });
    }

    /// Dispatch `event` to every handler of its type
    ///
    /// Returns the number of handlers invoked.
    pub fn publish<E: Event>(&mut self, event: &E) -> usize {
        match self.subscriptions.get_mut(&TypeId::of::<E>()) {
            Some(list) => {
                for subscription in list.iter_mut() {
                    (subscription.callback)(event);
                }
                list.len()
            }
            None => 0,
        }
    }

    /// Remove every registration of `subscriber` for event type `E`
    pub fn unsubscribe<E: Event>(&mut self, subscriber: SubscriberId) {
        if let Some(list) = self.subscriptions.get_mut(&TypeId::of::<E>()) {
            list.retain(|s| s.subscriber != subscriber);
            if list.is_empty() {
                self.subscriptions.remove(&TypeId::of::<E>());
            }
        }
    }

    /// Remove every registration of `subscriber`, across all event types
    pub fn unsubscribe_all(&mut self, subscriber: SubscriberId) {
        self.subscriptions.retain(|_, list| {
            list.retain(|s| s.subscriber != subscriber);
            !list.is_empty()
        });
    }

    /// Number of registrations held by `subscriber`
    pub fn subscription_count(&self, subscriber: SubscriberId) -> usize {
        self.subscriptions
            .values()
            .flat_map(|list| list.iter())
            .filter(|s| s.subscriber == subscriber)
            .count()
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriptions.contains_key(&TypeId::of::<E>())
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
