//! Capability traits consumed by the cache coordinator.
//!
//! A [`SharedStore`] is the publisher side: GET, SET with optional expiry and
//! PUBLISH. Subscribing happens on a separate [`SubscriberConnection`]
//! obtained from [`SharedStore::subscriber`], so a busy subscription never
//! blocks publishing and two coordinators never share a subscription.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::StoreError;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub channel: String,
    /// Raw payload as published.
    pub payload: String,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of inbound messages for one subscription.
///
/// Dropping the stream disconnects the subscription. The stream ends on its
/// own when the underlying connection is lost.
pub type MessageStream = BoxStream<'static, InboundMessage>;

/// Networked key-value store with a publish/subscribe bus.
///
/// Implementations must be thread-safe (`Send + Sync`) and cheap to share
/// behind an `Arc`.
///
/// # Example
///
/// ```ignore
/// use hybrid_cache_store::{MemoryStore, SharedStore};
///
/// let store = MemoryStore::new();
/// store.set("user:1", r#"{"name":"Ada"}"#, None).await?;
/// assert!(store.get("user:1").await?.is_some());
/// ```
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Reads a serialized value. Returns `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores a serialized value (`SET key value [PX ms]`).
    ///
    /// `None` or a zero `ttl` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Broadcasts `payload` to every current subscriber of `topic`,
    /// including subscriptions opened by the publishing process itself.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError>;

    /// Opens an independent subscriber connection sharing this store's
    /// configuration (DUPLICATE).
    ///
    /// This must not perform network I/O; the connection is established by
    /// [`SubscriberConnection::subscribe`].
    fn subscriber(&self) -> Result<Box<dyn SubscriberConnection>, StoreError>;
}

/// A dedicated connection used only for receiving published messages.
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    /// Completes the SUBSCRIBE handshake for `topic` and returns the inbound
    /// message stream. Resolves only once the bus acknowledged the
    /// subscription.
    ///
    /// May be called again after a stream ended to resubscribe.
    async fn subscribe(&mut self, topic: &str) -> Result<MessageStream, StoreError>;
}
