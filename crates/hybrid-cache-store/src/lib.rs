//! # hybrid-cache-store
//!
//! The shared-store boundary of hybrid-cache: the capabilities a cache
//! coordinator consumes from a networked key-value store and its
//! publish/subscribe bus.
//!
//! ## Overview
//!
//! - [`SharedStore`]: GET, SET with optional expiry, PUBLISH, and DUPLICATE
//!   via [`SharedStore::subscriber`]
//! - [`SubscriberConnection`]: a dedicated connection that performs the
//!   SUBSCRIBE handshake and yields a [`MessageStream`]
//!
//! ## Backends
//!
//! - [`RedisStore`]: Redis through `deadpool-redis`, with a lazily created
//!   publisher pool and one pub/sub client per subscriber
//! - [`MemoryStore`]: in-process table and bus, clones share state

pub mod error;
pub mod memory;
pub mod redis;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis::{RedisConfig, RedisStore};
pub use traits::{InboundMessage, MessageStream, SharedStore, SubscriberConnection};
