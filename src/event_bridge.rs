//! Outward subscription registry for session events.
//!
//! Application code subscribes callbacks and receives remote commands,
//! interruptions, and volume changes in the exact order the coordinator
//! emits them. Unsubscribing is a value: dropping the returned guard removes
//! the subscriber without affecting any other.

use std::sync::{Arc, Mutex, Weak};

use log::warn;
use uuid::Uuid;

use crate::protocol::SessionEvent;

type Callback = Box<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    // Vec keeps registration order; emission iterates it front to back.
    subscribers: Vec<(Uuid, Callback)>,
}

/// Multi-subscriber event fan-out, cloneable across threads.
#[derive(Clone, Default)]
pub struct EventBridge {
    inner: Arc<Mutex<Registry>>,
}

/// Keeps one subscription alive; dropping it unsubscribes.
pub struct SubscriptionGuard {
    token: Uuid,
    registry: Weak<Mutex<Registry>>,
    detached: bool,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its guard.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionGuard
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let token = Uuid::new_v4();
        self.lock().subscribers.push((token, Box::new(callback)));
        SubscriptionGuard {
            token,
            registry: Arc::downgrade(&self.inner),
            detached: false,
        }
    }

    /// Removes one subscriber by token. Returns whether it was present.
    pub fn remove(&self, token: Uuid) -> bool {
        let mut registry = self.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(id, _)| *id != token);
        registry.subscribers.len() < before
    }

    /// Clears every subscriber. The session itself stays enabled.
    pub fn remove_all(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Delivers one event to every subscriber in registration order.
    pub fn emit(&self, event: &SessionEvent) {
        // Callbacks run under the registry lock, which keeps cross-event
        // ordering identical for every subscriber. Subscribers must not
        // re-enter the bridge from their callback.
        for (_, callback) in self.lock().subscribers.iter() {
            callback(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("EventBridge: registry lock poisoned, continuing");
                poisoned.into_inner()
            }
        }
    }
}

impl SubscriptionGuard {
    /// Stable token identifying this subscription.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Keeps the subscription alive after the guard is dropped. It can still
    /// be removed later via `EventBridge::remove` or `remove_all`.
    pub fn detach(mut self) -> Uuid {
        self.detached = true;
        self.token
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = match registry.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            registry.subscribers.retain(|(id, _)| *id != self.token);
        }
    }
}
