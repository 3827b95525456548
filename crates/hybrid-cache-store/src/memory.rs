//! In-process shared store and invalidation bus.
//!
//! [`MemoryStore`] implements [`SharedStore`] without any networking. Clones
//! share the same backing table and bus, so several coordinators built from
//! clones of one store behave like processes talking to one Redis server.
//! Useful for single-process deployments and for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{InboundMessage, MessageStream, SharedStore, SubscriberConnection};

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug)]
struct Subscriber {
    topic: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: DashMap<String, StoredValue>,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// In-memory [`SharedStore`] with per-topic fan-out.
///
/// Publishing enqueues the message for every live subscriber of the topic
/// under one lock, so messages from a single publisher arrive in the order
/// they were published. Subscribers whose stream was dropped are pruned on
/// the next publish.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.iter().filter(|s| s.topic == topic).count()
    }

    /// Number of stored, unexpired values.
    pub fn len(&self) -> usize {
        self.inner
            .values
            .iter()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(stored) = self.inner.values.get(key) else {
            return Ok(None);
        };
        if stored.is_expired() {
            drop(stored);
            self.inner.values.remove_if(key, |_, v| v.is_expired());
            return Ok(None);
        }
        Ok(Some(stored.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| Instant::now() + t);
        self.inner.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0usize;
        subscribers.retain(|subscriber| {
            if subscriber.topic != topic {
                return !subscriber.sender.is_closed();
            }
            let sent = subscriber
                .sender
                .send(InboundMessage::new(topic, payload))
                .is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        debug!(topic = %topic, delivered, "published message on memory bus");
        Ok(())
    }

    fn subscriber(&self) -> Result<Box<dyn SubscriberConnection>, StoreError> {
        Ok(Box::new(MemorySubscriber {
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Subscriber connection on a [`MemoryStore`] bus.
#[derive(Debug)]
struct MemorySubscriber {
    inner: Arc<MemoryInner>,
}

#[async_trait]
impl SubscriberConnection for MemorySubscriber {
    async fn subscribe(&mut self, topic: &str) -> Result<MessageStream, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.push(Subscriber {
            topic: topic.to_string(),
            sender,
        });
        drop(subscribers);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}
