//! Cache coordinator: local store + shared store + invalidation channel.

use std::sync::Arc;
use std::time::Duration;

use hybrid_cache_store::{RedisStore, SharedStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::channel::{InvalidationChannel, Listener};
use crate::config::HybridCacheConfig;
use crate::error::{CacheError, Result};
use crate::local::LocalStore;
use crate::message::{INVALIDATE_EVENT, InvalidationMessage};
use crate::topic::Topic;

/// Two-tier cache kept coherent with its peers through a shared topic.
///
/// ## Read/Write Paths
///
/// | Operation                | Local store | Shared store | Bus     |
/// |--------------------------|-------------|--------------|---------|
/// | `get` / `has` / `put`    | yes         |              |         |
/// | `get_durable`            | read        | read on miss |         |
/// | `put_durable`            | write       | detached SET |         |
/// | `invalidate*`            | via echo    |              | PUBLISH |
///
/// `invalidate` and `invalidate_and_update` never touch this cache's own
/// local store directly: the cache is subscribed to its own topic and
/// applies the echoed message like any peer does.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::new());
/// let cache: HybridCache = HybridCache::create("users", store).await?;
///
/// cache.put("user:1", json!({"name": "Ada"}), None);
/// cache.invalidate("user:1").await?;
/// ```
pub struct HybridCache<V = serde_json::Value> {
    topic: Topic,
    local: Arc<LocalStore<V>>,
    store: Arc<dyn SharedStore>,
    channel: InvalidationChannel<V>,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub topic: String,
    pub entries: usize,
    pub subscribed: bool,
}

impl<V> HybridCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Constructs a cache that is *not yet* subscribed.
    ///
    /// Fails with [`CacheError::InvalidTopic`] on an empty topic before any
    /// network interaction. Obtains this cache's own subscriber connection,
    /// which does not connect until [`subscribe`](Self::subscribe).
    pub fn new(topic: impl Into<String>, store: Arc<dyn SharedStore>) -> Result<Self> {
        let topic = Topic::new(topic)?;
        let connection = store.subscriber()?;
        let local = Arc::new(LocalStore::new());
        let channel = InvalidationChannel::new(topic.clone(), connection, Arc::clone(&local));

        Ok(Self {
            topic,
            local,
            store,
            channel,
        })
    }

    /// Constructs a cache and waits until it is subscribed.
    pub async fn create(topic: impl Into<String>, store: Arc<dyn SharedStore>) -> Result<Self> {
        let cache = Self::new(topic, store)?;
        cache.subscribe().await?;
        Ok(cache)
    }

    /// Constructs and subscribes a Redis-backed cache from configuration.
    ///
    /// The publisher pool is owned by the returned cache and created on the
    /// first remote operation.
    pub async fn from_config(config: &HybridCacheConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RedisStore::from_config(&config.redis));
        Self::create(config.topic.clone(), store).await
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The local tier, shared with the dispatch task.
    pub fn local(&self) -> Arc<LocalStore<V>> {
        Arc::clone(&self.local)
    }

    /// Reads the local store only.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.local.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.local.has(key)
    }

    /// Writes the local store only. Peers are not informed.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<Arc<V>>,
        timeout: Option<Duration>,
    ) -> Arc<V> {
        self.local.put(key, value, timeout)
    }

    /// Reads the local store, falling back to the shared store on a miss.
    ///
    /// A value found remotely is returned but not copied into the local
    /// store.
    pub async fn get_durable(&self, key: &str) -> Result<Option<Arc<V>>> {
        if let Some(value) = self.local.get(key) {
            return Ok(Some(value));
        }

        match self.store.get(key).await? {
            Some(raw) => {
                debug!(key = %key, "local miss served from shared store");
                Ok(Some(Arc::new(serde_json::from_str(&raw)?)))
            }
            None => Ok(None),
        }
    }

    /// Writes the local store and mirrors the value to the shared store.
    ///
    /// Returns as soon as the local write is done. The remote write runs
    /// detached on the current Tokio runtime; its failures are logged and
    /// never reported to the caller.
    pub fn put_durable(
        &self,
        key: impl Into<String>,
        value: impl Into<Arc<V>>,
        timeout: Option<Duration>,
    ) -> Arc<V> {
        let key = key.into();
        let value = self.local.put(key.clone(), value, timeout);
        self.mirror(key, Arc::clone(&value), timeout);
        value
    }

    fn mirror(&self, key: String, value: Arc<V>, timeout: Option<Duration>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No Tokio runtime, skipping shared store write");
            return;
        };

        let store = Arc::clone(&self.store);
        runtime.spawn(async move {
            let serialized = match serde_json::to_string(&*value) {
                Ok(serialized) => serialized,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to serialize value for shared store");
                    return;
                }
            };

            match store.set(&key, &serialized, timeout).await {
                Ok(()) => debug!(key = %key, "cache set (local + shared)"),
                Err(e) => warn!(key = %key, error = %e, "Shared store SET error"),
            }
        });
    }

    /// Publishes an eviction of `key` to every cache on the topic, this one
    /// included.
    pub async fn invalidate(&self, key: impl Into<String>) -> Result<()> {
        self.publish(InvalidationMessage::evict(key)).await
    }

    /// Publishes a replacement of `key` to every cache on the topic, this one
    /// included.
    pub async fn invalidate_and_update(
        &self,
        key: impl Into<String>,
        value: V,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.publish(InvalidationMessage::replace(key, value, timeout))
            .await
    }

    async fn publish(&self, message: InvalidationMessage<V>) -> Result<()> {
        let payload = message.encode()?;
        self.store
            .publish(self.topic.as_str(), &payload)
            .await?;
        debug!(
            topic = %self.topic,
            key = %message.key(),
            action = message.action(),
            "published invalidation"
        );
        Ok(())
    }

    /// Registers the listener for `event`, which must be `"invalidate"`.
    ///
    /// The listener receives `(topic, key)` after each applied invalidation,
    /// including echoes of this cache's own messages, and replaces any
    /// previously registered one. Any other event name fails with
    /// [`CacheError::UnsupportedEvent`] and registers nothing.
    pub fn on<F>(&self, event: &str, listener: F) -> Result<()>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        if event != INVALIDATE_EVENT {
            return Err(CacheError::unsupported_event(event));
        }
        self.on_invalidate(listener);
        Ok(())
    }

    pub fn on_invalidate<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.channel.set_listener(Listener::new(listener));
    }

    /// Subscribes to the topic. See [`InvalidationChannel::subscribe`].
    pub async fn subscribe(&self) -> Result<()> {
        self.channel.subscribe().await
    }

    /// Permanently stops receiving invalidations. Idempotent.
    pub async fn unsubscribe(&self) -> Result<()> {
        self.channel.unsubscribe().await
    }

    pub async fn is_subscribed(&self) -> bool {
        self.channel.is_subscribed().await
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            topic: self.topic.to_string(),
            entries: self.local.len(),
            subscribed: self.is_subscribed().await,
        }
    }
}

impl<V> std::fmt::Debug for HybridCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("topic", &self.topic)
            .field("local", &self.local)
            .field("channel", &self.channel)
            .finish()
    }
}
