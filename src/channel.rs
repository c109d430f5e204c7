use crate::error::CallError;
use crate::signaling::SignalMessage;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<T>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

/// Named pub/sub topic used for call signaling. Delivery is best effort and
/// payloads arrive undecoded.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    async fn publish(&self, topic: &str, message: &SignalMessage) -> Result<(), CallError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription<Value>, CallError>;
}

type Listeners = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>;

/// In-process broadcast hub. Every subscriber of a topic, the publisher
/// included, receives each message in publish order.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    topics: Listeners,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an already encoded payload, bypassing the codec.
    pub fn publish_raw(&self, topic: &str, payload: Value) -> Result<usize, CallError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| CallError::Channel("hub state poisoned".into()))?;
        let Some(listeners) = inner.topics.get_mut(topic) else {
            trace!(topic, "publish with no subscribers");
            return Ok(0);
        };
        listeners.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        Ok(listeners.len())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.topics.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl SignalChannel for LocalHub {
    async fn publish(&self, topic: &str, message: &SignalMessage) -> Result<(), CallError> {
        let delivered = self.publish_raw(topic, message.encode()?)?;
        debug!(topic, kind = %message.kind(), delivered, "signal published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription<Value>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| CallError::Channel("hub state poisoned".into()))?;
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .topics
                .entry(topic.to_string())
                .or_default()
                .push((id, tx));
            id
        };
        debug!(topic, id, "subscribed");

        let hub = Arc::downgrade(&self.inner);
        let topic = topic.to_string();
        Ok(Subscription::new(rx, move || {
            let Some(hub) = hub.upgrade() else { return };
            if let Ok(mut inner) = hub.lock() {
                if let Some(listeners) = inner.topics.get_mut(&topic) {
                    listeners.retain(|(sid, _)| *sid != id);
                    if listeners.is_empty() {
                        inner.topics.remove(&topic);
                    }
                }
            }
            debug!(topic = %topic, id, "unsubscribed");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserId;
    use crate::signaling::Signal;

    #[tokio::test]
    async fn subscribers_receive_in_order_and_unsubscribe_on_drop() {
        let hub = LocalHub::new();
        let mut sub = hub.subscribe("call-a-b").await.unwrap();
        assert_eq!(hub.subscriber_count("call-a-b"), 1);

        let from = UserId::new("a");
        hub.publish("call-a-b", &SignalMessage::new(from.clone(), Signal::Request))
            .await
            .unwrap();
        hub.publish("call-a-b", &SignalMessage::new(from, Signal::End))
            .await
            .unwrap();

        let first = SignalMessage::decode(sub.recv().await.unwrap()).unwrap();
        let second = SignalMessage::decode(sub.recv().await.unwrap()).unwrap();
        assert_eq!(first.signal, Signal::Request);
        assert_eq!(second.signal, Signal::End);

        drop(sub);
        assert_eq!(hub.subscriber_count("call-a-b"), 0);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = LocalHub::new();
        let mut other = hub.subscribe("call-c-d").await.unwrap();
        hub.publish(
            "call-a-b",
            &SignalMessage::new(UserId::new("a"), Signal::Request),
        )
        .await
        .unwrap();
        assert!(other.try_recv().is_none());
    }
}
