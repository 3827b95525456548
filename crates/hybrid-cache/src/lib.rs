//! # hybrid-cache
//!
//! Two-tier cache for processes that share data through a networked store.
//!
//! Each process keeps a fast in-memory [`LocalStore`] and subscribes to a
//! topic on the shared store's publish/subscribe bus. Invalidations published
//! by any process on the topic are applied by every subscribed process, the
//! publisher included, so local copies converge without polling.
//!
//! ## Overview
//!
//! - [`HybridCache`]: the coordinator (local reads/writes, durable
//!   read-through and write-behind, invalidation publishing)
//! - [`InvalidationChannel`]: the subscriber side, one dispatch task per cache
//! - [`InvalidationMessage`]: the JSON wire format, with the bare-key form
//!   still accepted on input
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hybrid_cache::{HybridCache, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let a: HybridCache = HybridCache::create("users", store.clone()).await?;
//! let b: HybridCache = HybridCache::create("users", store).await?;
//!
//! b.on("invalidate", |topic, key| println!("{topic}: {key} changed"))?;
//! a.invalidate_and_update("user:1", serde_json::json!({"name": "Ada"}), None).await?;
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod message;
pub mod observability;
pub mod topic;

pub use channel::{InvalidationChannel, Listener, Subscription};
pub use config::{HybridCacheConfig, LoggingConfig, RedisConfig, loader};
pub use coordinator::{CacheStats, HybridCache};
pub use error::{CacheError, Result};
pub use local::LocalStore;
pub use message::{INVALIDATE_EVENT, InvalidationMessage};
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level};
pub use topic::Topic;

pub use hybrid_cache_store::{
    InboundMessage, MemoryStore, MessageStream, RedisStore, SharedStore, StoreError,
    SubscriberConnection,
};
