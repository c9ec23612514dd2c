use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use visit_common::kafka_consumer::{Checkpoint, RecvErr, SingleTopicConsumer};

use crate::registry::{Delivery, SubscriberChannel, SubscriptionId, SubscriptionRegistry};

/// Forwards live device updates to whoever subscribed to that device.
///
/// The router owns the subscription registry; connection handlers reach it
/// through the router, and it lives as long as the service does.
pub struct EventRouter {
    registry: SubscriptionRegistry,
    subscriber_buffer: usize,
}

/// A registered subscription, as seen by the connection that owns it.
pub struct Subscription {
    pub id: SubscriptionId,
    /// Yields dispatched payloads. Ends if a newer subscriber replaces this one.
    pub updates: mpsc::Receiver<String>,
}

impl EventRouter {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn subscribe(&self, device_id: &str, channel: SubscriberChannel) -> SubscriptionId {
        self.registry.subscribe(device_id, channel)
    }

    /// Open a fresh channel and register it for `device_id`.
    pub fn connect(&self, device_id: &str) -> Subscription {
        let (channel, updates) = mpsc::channel(self.subscriber_buffer);
        let id = self.subscribe(device_id, channel);
        Subscription { id, updates }
    }

    pub fn unsubscribe(&self, device_id: &str) -> bool {
        self.registry.unsubscribe(device_id)
    }

    pub fn release(&self, device_id: &str, id: SubscriptionId) -> bool {
        self.registry.release(device_id, id)
    }

    pub fn dispatch(&self, device_id: &str, payload: String) -> Delivery {
        let delivery = self.registry.dispatch(device_id, payload);
        match delivery {
            Delivery::Dropped => warn!(device_id, "subscriber lagging, update dropped"),
            Delivery::Disconnected => info!(device_id, "subscriber gone, unsubscribed"),
            Delivery::Delivered => debug!(device_id, "forwarded update to subscriber"),
            Delivery::NoSubscriber => {}
        }
        metrics::counter!("relay_updates_total", "delivery" => delivery.as_str()).increment(1);
        delivery
    }

    /// Route one upstream message, then checkpoint it.
    ///
    /// The checkpoint is committed exactly once whatever happened to the
    /// payload: nothing is redelivered, whether it reached a subscriber or not.
    /// Returns `None` when the message carried no usable device id.
    pub fn process<C: Checkpoint>(&self, payload: Vec<u8>, checkpoint: C) -> Option<Delivery> {
        let delivery = match decode_update(payload) {
            Ok((device_id, text)) => Some(self.dispatch(&device_id, text)),
            Err(reason) => {
                warn!("dropping update: {}", reason);
                metrics::counter!("relay_updates_dropped_total").increment(1);
                None
            }
        };

        if let Err(e) = checkpoint.commit() {
            error!("failed to store update offset: {}", e);
        }

        delivery
    }

    /// Consume live updates until `shutdown` resolves.
    pub async fn run<F>(&self, consumer: SingleTopicConsumer, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("starting live update consumer");
        tokio::pin!(shutdown);

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = consumer.recv() => received,
            };

            match received {
                Ok((payload, offset)) => {
                    self.process(payload, offset);
                }
                Err(RecvErr::Kafka(e)) => {
                    error!("failed to receive live update: {}", e);
                    metrics::counter!("relay_receive_errors_total").increment(1);
                }
                Err(e) => {
                    warn!("dropping live update: {}", e);
                    metrics::counter!("relay_updates_dropped_total").increment(1);
                }
            }
        }

        info!("live update consumer stopped");
    }
}

/// Split an update into its target device and the text to forward.
fn decode_update(payload: Vec<u8>) -> Result<(String, String), String> {
    let text = String::from_utf8(payload).map_err(|e| format!("body is not utf-8: {}", e))?;
    let body: Value =
        serde_json::from_str(&text).map_err(|e| format!("body is not json: {}", e))?;

    match body.get("device_id") {
        Some(Value::String(device_id)) if !device_id.is_empty() => Ok((device_id.clone(), text)),
        Some(_) => Err("device_id is not a non-empty string".to_owned()),
        None => Err("no device_id in body".to_owned()),
    }
}
