//! Redis-backed shared store.
//!
//! Publishing and key-value commands go through a `deadpool-redis` pool that
//! is either supplied by the caller or created lazily on first use.
//! Subscriptions never use the pool: each [`SharedStore::subscriber`] call
//! hands out a dedicated pub/sub client (pooled connections can't be used
//! for SUBSCRIBE).

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Client};
use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::traits::{InboundMessage, MessageStream, SharedStore, SubscriberConnection};

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Publisher connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// [`SharedStore`] backed by a Redis server.
pub struct RedisStore {
    config: RedisConfig,
    pool: OnceCell<Pool>,
}

impl RedisStore {
    /// Creates a store that opens its own publisher pool on first use.
    ///
    /// No connection is attempted until the first remote operation.
    pub fn from_config(config: &RedisConfig) -> Self {
        Self {
            config: config.clone(),
            pool: OnceCell::new(),
        }
    }

    /// Creates a store publishing through a caller-supplied pool.
    ///
    /// The caller keeps ownership of the pool's lifecycle. `config.url` is
    /// still needed to open subscriber connections.
    pub fn with_pool(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            config: config.clone(),
            pool: OnceCell::new_with(Some(pool)),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Returns the publisher pool, creating it if needed.
    pub async fn pool(&self) -> Result<&Pool, StoreError> {
        self.pool
            .get_or_try_init(|| async { self.create_pool() })
            .await
    }

    fn create_pool(&self) -> Result<Pool, StoreError> {
        info!(url = %self.config.url, "Creating Redis publisher pool");

        let timeout = Some(self.config.timeout());
        let mut pool_config = PoolConfig::new(self.config.pool_size);
        let mut timeouts = Timeouts::default();
        timeouts.wait = timeout;
        timeouts.create = timeout;
        timeouts.recycle = timeout;
        pool_config.timeouts = timeouts;

        let mut redis_config = deadpool_redis::Config::from_url(&self.config.url);
        redis_config.pool = Some(pool_config);

        redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::pool(e.to_string()))
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, StoreError> {
        self.pool()
            .await?
            .get()
            .await
            .map_err(|e| StoreError::pool(e.to_string()))
    }

    /// Checks that the publisher side can reach Redis (for health checks).
    pub async fn is_available(&self) -> bool {
        self.connection().await.is_ok()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("pool_initialized", &self.pool.initialized())
            .finish()
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError::command(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result = match ttl.filter(|t| !t.is_zero()) {
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                conn.pset_ex::<_, _, ()>(key, value, millis).await
            }
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| StoreError::command(format!("SET {key}: {e}")))?;

        debug!(key = %key, ttl_ms = ?ttl.map(|t| t.as_millis()), "stored value in Redis");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let receivers: usize = conn
            .publish(topic, payload)
            .await
            .map_err(|e| StoreError::publish(e.to_string()))?;

        debug!(topic = %topic, receivers, "published message to Redis");
        Ok(())
    }

    fn subscriber(&self) -> Result<Box<dyn SubscriberConnection>, StoreError> {
        let client = Client::open(self.config.url.as_str())
            .map_err(|e| StoreError::connection(format!("failed to create Redis client: {e}")))?;
        Ok(Box::new(RedisSubscriber { client }))
    }
}

/// Dedicated pub/sub client. Each `subscribe` opens a fresh connection.
struct RedisSubscriber {
    client: Client,
}

#[async_trait]
impl SubscriberConnection for RedisSubscriber {
    async fn subscribe(&mut self, topic: &str) -> Result<MessageStream, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::connection(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| StoreError::subscribe(e.to_string()))?;

        info!(topic = %topic, "Subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let message = match msg.get_payload::<String>() {
                Ok(payload) => Some(InboundMessage::new(msg.get_channel_name(), payload)),
                Err(e) => {
                    warn!(error = %e, "failed to parse pub/sub message payload");
                    None
                }
            };
            futures_util::future::ready(message)
        });

        Ok(Box::pin(stream))
    }
}
