//! Which connection, if any, is listening for each device.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a subscriber connection.
pub type SubscriberChannel = mpsc::Sender<String>;

/// Identifies one registration, so a connection that was replaced cannot
/// tear down its successor when it goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the subscriber's channel.
    Delivered,
    /// Nobody listens for this device.
    NoSubscriber,
    /// The subscriber is not keeping up; this payload is lost.
    Dropped,
    /// The subscriber went away; it is no longer registered.
    Disconnected,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Delivered => "delivered",
            Delivery::NoSubscriber => "no_subscriber",
            Delivery::Dropped => "dropped",
            Delivery::Disconnected => "disconnected",
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    channel: SubscriberChannel,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_subscribed(&self, device_id: &str) -> bool {
        self.lock().contains_key(device_id)
    }

    /// Register `channel` for `device_id`, replacing any previous subscriber.
    pub fn subscribe(&self, device_id: &str, channel: SubscriberChannel) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.lock();
        if subscribers
            .insert(device_id.to_owned(), Subscriber { id, channel })
            .is_some()
        {
            debug!(device_id, "replaced previous subscriber");
        }
        metrics::gauge!("relay_subscribers").set(subscribers.len() as f64);
        id
    }

    /// Remove whatever is registered for `device_id`.
    pub fn unsubscribe(&self, device_id: &str) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(device_id).is_some();
        metrics::gauge!("relay_subscribers").set(subscribers.len() as f64);
        removed
    }

    /// Remove the registration `id` for `device_id`, unless it was replaced since.
    pub fn release(&self, device_id: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        match subscribers.get(device_id) {
            Some(subscriber) if subscriber.id == id => {
                subscribers.remove(device_id);
                metrics::gauge!("relay_subscribers").set(subscribers.len() as f64);
                true
            }
            _ => false,
        }
    }

    /// Hand `payload` to the subscriber of `device_id` without waiting.
    pub fn dispatch(&self, device_id: &str, payload: String) -> Delivery {
        let mut subscribers = self.lock();
        let Some(subscriber) = subscribers.get(device_id) else {
            return Delivery::NoSubscriber;
        };

        match subscriber.channel.try_send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                subscribers.remove(device_id);
                metrics::gauge!("relay_subscribers").set(subscribers.len() as f64);
                Delivery::Disconnected
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
