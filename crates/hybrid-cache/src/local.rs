//! Process-local key/value table with per-entry expiry.
//!
//! Expiry is enforced twice: every read checks the deadline, and when a Tokio
//! runtime is available a fire-once timer removes the entry once it lapses so
//! expired values don't linger in memory. Without a runtime only the read-time
//! check applies, which is enough to never return a stale entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;

type Entries<V> = DashMap<String, LocalEntry<V>>;

/// A cached value with its optional deadline.
///
/// `generation` identifies this particular write so that an expiry timer
/// scheduled for an older write never removes a newer one.
struct LocalEntry<V> {
    value: Arc<V>,
    expires_at: Option<Instant>,
    generation: u64,
    expiry: Option<AbortHandle>,
}

impl<V> LocalEntry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn cancel_expiry(&self) {
        if let Some(expiry) = &self.expiry {
            expiry.abort();
        }
    }
}

/// In-process cache table.
///
/// Values are stored as `Arc<V>`; [`LocalStore::put`] returns the same `Arc`
/// that subsequent reads hand out.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hybrid_cache::LocalStore;
///
/// let store: LocalStore<u32> = LocalStore::new();
/// let stored = store.put("answer", 42, None);
/// assert!(Arc::ptr_eq(&stored, &store.get("answer").unwrap()));
/// ```
pub struct LocalStore<V> {
    entries: Arc<Entries<V>>,
    generation: AtomicU64,
}

impl<V> LocalStore<V>
where
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the value for `key` unless it is absent or expired.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            let generation = entry.generation;
            drop(entry);
            self.remove_generation(key, generation);
            return None;
        }
        Some(Arc::clone(&entry.value))
    }

    /// Stores `value` under `key`, replacing any previous value and expiry.
    ///
    /// A `timeout` of `None` or zero means the entry never expires.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<Arc<V>>,
        timeout: Option<Duration>,
    ) -> Arc<V> {
        let key = key.into();
        let value = value.into();
        let timeout = timeout.filter(|t| !t.is_zero());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let entry = LocalEntry {
            value: Arc::clone(&value),
            expires_at: timeout.map(|t| Instant::now() + t),
            generation,
            expiry: timeout.and_then(|t| self.schedule_expiry(key.clone(), generation, t)),
        };

        if let Some(previous) = self.entries.insert(key, entry) {
            previous.cancel_expiry();
        }
        value
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            entry.cancel_expiry();
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all unexpired entries, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_expired())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Removes every entry and cancels pending expiry timers.
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.cancel_expiry();
            false
        });
    }

    /// Drops expired entries eagerly. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired();
            if expired {
                entry.cancel_expiry();
            }
            !expired
        });
        before.saturating_sub(self.entries.len())
    }

    fn remove_generation(&self, key: &str, generation: u64) {
        if let Some((_, entry)) = self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation)
        {
            entry.cancel_expiry();
        }
    }

    fn schedule_expiry(&self, key: String, generation: u64, timeout: Duration) -> Option<AbortHandle> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let entries: Weak<Entries<V>> = Arc::downgrade(&self.entries);
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(entries) = entries.upgrade() {
                entries.remove_if(&key, |_, entry| entry.generation == generation);
            }
        });
        Some(task.abort_handle())
    }
}

impl<V> Default for LocalStore<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for LocalStore<V> {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.cancel_expiry();
        }
    }
}

impl<V> std::fmt::Debug for LocalStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_key() {
        let store: LocalStore<String> = LocalStore::new();
        assert!(store.get("missing").is_none());
        assert!(!store.has("missing"));
    }

    #[test]
    fn test_put_returns_identical_value() {
        let store: LocalStore<serde_json::Value> = LocalStore::new();
        let value = Arc::new(serde_json::json!({"rich": "object"}));

        let stored = store.put("key", Arc::clone(&value), None);
        assert!(Arc::ptr_eq(&stored, &value));
        assert!(Arc::ptr_eq(&store.get("key").unwrap(), &value));
        assert!(store.has("key"));
    }

    #[test]
    fn test_put_replaces_value() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 1, None);
        store.put("key", 2, None);
        assert_eq!(*store.get("key").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store: LocalStore<String> = LocalStore::new();
        store.put("key", "value".to_string(), None);
        store.delete("key");
        store.delete("key");
        store.delete("never-set");
        assert!(store.get("key").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_timeout() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 7, Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(store.get("key").as_deref(), Some(&7));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(store.get("key").is_none());
        assert!(!store.has("key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_removes_entry() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 7, Some(Duration::from_millis(100)));
        assert_eq!(store.entries.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.entries.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_put_cancels_pending_expiry() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 1, Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(50)).await;
        store.put("key", 2, None);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.get("key").as_deref(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_put_takes_new_deadline() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 1, Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(80)).await;
        store.put("key", 2, Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(store.get("key").as_deref(), Some(&2));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(store.get("key").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_expires() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 1, Some(Duration::ZERO));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.has("key"));
    }

    #[test]
    fn test_expiry_without_runtime() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("key", 1, Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.get("key").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_len_keys_and_purge_skip_expired() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("short", 1, Some(Duration::from_millis(10)));
        store.put("long", 2, None);

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys(), vec!["long".to_string()]);

        let purged = store.purge_expired();
        assert!(purged <= 1);
        assert_eq!(store.entries.len(), 1);
    }

    #[test]
    fn test_clear() {
        let store: LocalStore<u32> = LocalStore::new();
        store.put("a", 1, None);
        store.put("b", 2, Some(Duration::from_secs(60)));
        store.clear();
        assert!(store.is_empty());
        assert!(store.keys().is_empty());
    }
}
