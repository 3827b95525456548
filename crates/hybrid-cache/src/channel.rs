//! Pub/sub invalidation channel bound to one topic.
//!
//! ## How It Works
//!
//! 1. The channel owns a dedicated subscriber connection, never shared with
//!    the publisher side or with another cache
//! 2. [`InvalidationChannel::subscribe`] completes the SUBSCRIBE handshake and
//!    spawns one dispatch task
//! 3. The dispatch task decodes each message, applies it to the local store,
//!    then notifies the listener
//! 4. [`InvalidationChannel::unsubscribe`] stops the task and waits for it, so
//!    nothing is applied after it returns
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: cache.invalidate("key1")
//!   ↓
//! PUBLISH <topic> {"action":"invalidate","key":"key1"}
//!   ↓
//! Instance 1: dispatch receives its own echo → removes "key1"
//! Instance 2: dispatch receives "key1" → removes "key1" → listener("<topic>", "key1")
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::StreamExt;
use hybrid_cache_store::{MessageStream, SubscriberConnection};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, Result};
use crate::local::LocalStore;
use crate::message::InvalidationMessage;
use crate::topic::Topic;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Callback invoked with `(topic, key)` after an invalidation was applied.
pub struct Listener(Box<dyn Fn(&str, &str) + Send + Sync>);

impl Listener {
    pub fn new(callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        Self(Box::new(callback))
    }

    fn notify(&self, topic: &Topic, key: &str) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.0)(topic.as_str(), key)));
        if outcome.is_err() {
            error!(topic = %topic, key = %key, "invalidate listener panicked");
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Listener")
    }
}

/// Handle to a running dispatch task.
///
/// [`Subscription::cancel`] is idempotent. Dropping the handle also stops
/// the task, without waiting for it.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stops the dispatch task and waits until it has exited.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "invalidation dispatch task panicked");
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum ChannelState {
    /// Connection obtained, not yet subscribed.
    Idle(Box<dyn SubscriberConnection>),
    Active(Subscription),
    /// Permanently unsubscribed.
    Closed,
}

/// Subscriber side of one cache: owns its connection and dispatch task.
pub struct InvalidationChannel<V> {
    topic: Topic,
    local: Arc<LocalStore<V>>,
    listener: Arc<ArcSwapOption<Listener>>,
    state: Mutex<ChannelState>,
}

impl<V> InvalidationChannel<V>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        topic: Topic,
        connection: Box<dyn SubscriberConnection>,
        local: Arc<LocalStore<V>>,
    ) -> Self {
        Self {
            topic,
            local,
            listener: Arc::new(ArcSwapOption::empty()),
            state: Mutex::new(ChannelState::Idle(connection)),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Replaces the listener notified after each applied invalidation.
    pub fn set_listener(&self, listener: Listener) {
        self.listener.store(Some(Arc::new(listener)));
    }

    pub fn clear_listener(&self) {
        self.listener.store(None);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.load().is_some()
    }

    /// Performs the SUBSCRIBE handshake and starts dispatching.
    ///
    /// Resolves once the bus acknowledged the subscription. Calling it while
    /// already subscribed is a no-op; calling it after
    /// [`unsubscribe`](Self::unsubscribe) fails with [`CacheError::Unsubscribed`].
    pub async fn subscribe(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        // The connection stays in `Idle` while the handshake is pending, so a
        // failed or cancelled handshake leaves the channel subscribable.
        let stream = match &mut *state {
            ChannelState::Idle(connection) => connection.subscribe(self.topic.as_str()).await?,
            ChannelState::Active(_) => return Ok(()),
            ChannelState::Closed => return Err(CacheError::Unsubscribed),
        };
        let connection = match std::mem::replace(&mut *state, ChannelState::Closed) {
            ChannelState::Idle(connection) => connection,
            other => {
                *state = other;
                return Ok(());
            }
        };

        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher {
            topic: self.topic.clone(),
            local: Arc::clone(&self.local),
            listener: Arc::clone(&self.listener),
            connection,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(dispatcher.run(stream));

        info!(topic = %self.topic, "Subscribed to invalidation topic");
        *state = ChannelState::Active(Subscription {
            cancel,
            task: Some(task),
        });
        Ok(())
    }

    /// Disconnects permanently. Idempotent.
    ///
    /// After this returns, no inbound message will touch the local store.
    pub async fn unsubscribe(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ChannelState::Closed) {
            ChannelState::Active(mut subscription) => {
                subscription.cancel().await;
                info!(topic = %self.topic, "Unsubscribed from invalidation topic");
            }
            ChannelState::Idle(_) => {
                debug!(topic = %self.topic, "Closed invalidation channel before subscribing");
            }
            ChannelState::Closed => {}
        }
        Ok(())
    }

    pub async fn is_subscribed(&self) -> bool {
        matches!(*self.state.lock().await, ChannelState::Active(_))
    }
}

impl<V> std::fmt::Debug for InvalidationChannel<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationChannel")
            .field("topic", &self.topic)
            .field("has_listener", &self.listener.load().is_some())
            .finish()
    }
}

/// State moved into the dispatch task.
struct Dispatcher<V> {
    topic: Topic,
    local: Arc<LocalStore<V>>,
    listener: Arc<ArcSwapOption<Listener>>,
    connection: Box<dyn SubscriberConnection>,
    cancel: CancellationToken,
}

impl<V> Dispatcher<V>
where
    V: DeserializeOwned + Send + Sync + 'static,
{
    async fn run(mut self, mut stream: MessageStream) {
        loop {
            self.drain(&mut stream).await;
            if self.cancel.is_cancelled() {
                break;
            }

            // Invalidations published while disconnected are lost; peers
            // converge again on the next message for the same key.
            warn!(topic = %self.topic, "Invalidation stream ended, resubscribing");
            match self.resubscribe().await {
                Some(next) => stream = next,
                None => break,
            }
        }
        debug!(topic = %self.topic, "Invalidation dispatch stopped");
    }

    /// Applies messages until the stream ends or the task is cancelled.
    async fn drain(&self, stream: &mut MessageStream) {
        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                message = stream.next() => message,
            };
            let Some(message) = message else {
                return;
            };
            if message.channel != self.topic.as_str() {
                continue;
            }
            self.apply(&message.payload);
        }
    }

    fn apply(&self, payload: &str) {
        let message = match InvalidationMessage::<V>::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    error = %e,
                    payload = %payload,
                    "Discarding undecodable invalidation message"
                );
                return;
            }
        };

        let key = match message {
            InvalidationMessage::Evict { key } => {
                self.local.delete(&key);
                debug!(topic = %self.topic, key = %key, "evicted local entry");
                key
            }
            InvalidationMessage::EvictAndReplace {
                key,
                value,
                timeout,
            } => {
                self.local.put(key.clone(), value, timeout);
                debug!(topic = %self.topic, key = %key, "replaced local entry");
                key
            }
        };

        if let Some(listener) = self.listener.load_full() {
            listener.notify(&self.topic, &key);
        }
    }

    /// Reconnects with exponential backoff. Returns `None` once cancelled.
    async fn resubscribe(&mut self) -> Option<MessageStream> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(backoff) => {}
            }

            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                attempt = self.connection.subscribe(self.topic.as_str()) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    info!(topic = %self.topic, "Resubscribed to invalidation topic");
                    return Some(stream);
                }
                Err(e) => {
                    error!(
                        topic = %self.topic,
                        error = %e,
                        transient = e.is_transient(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Resubscribe failed, retrying"
                    );
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use hybrid_cache_store::{InboundMessage, MemoryStore, SharedStore, StoreError};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn channel(store: &MemoryStore) -> InvalidationChannel<u32> {
        InvalidationChannel::new(
            Topic::new("channel-test").unwrap(),
            store.subscriber().unwrap(),
            Arc::new(LocalStore::new()),
        )
    }

    #[test]
    fn test_listener_slot() {
        let store = MemoryStore::new();
        let channel = channel(&store);
        assert!(!channel.has_listener());

        channel.set_listener(Listener::new(|_, _| {}));
        assert!(channel.has_listener());

        channel.clear_listener();
        assert!(!channel.has_listener());
    }

    #[tokio::test]
    async fn test_subscribe_lifecycle() {
        let store = MemoryStore::new();
        let channel = channel(&store);
        assert!(!channel.is_subscribed().await);

        channel.subscribe().await.unwrap();
        channel.subscribe().await.unwrap();
        assert!(channel.is_subscribed().await);
        assert_eq!(store.subscriber_count("channel-test"), 1);

        channel.unsubscribe().await.unwrap();
        assert!(!channel.is_subscribed().await);
        assert_eq!(store.subscriber_count("channel-test"), 0);
        assert!(matches!(
            channel.subscribe().await,
            Err(CacheError::Unsubscribed)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_before_subscribe_closes() {
        let store = MemoryStore::new();
        let channel = channel(&store);
        channel.unsubscribe().await.unwrap();
        assert!(channel.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_cancel_is_idempotent() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        let mut subscription = Subscription {
            cancel,
            task: Some(task),
        };

        subscription.cancel().await;
        subscription.cancel().await;
        assert!(subscription.is_cancelled());
    }

    type Feed = std::sync::Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>;

    /// Connection whose first stream ends right away; later ones stay open
    /// and are fed through `feed`.
    struct FlakyConnection {
        attempts: Arc<AtomicUsize>,
        feed: Arc<Feed>,
    }

    #[async_trait]
    impl SubscriberConnection for FlakyConnection {
        async fn subscribe(&mut self, _topic: &str) -> std::result::Result<MessageStream, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let (sender, receiver) = mpsc::unbounded_channel();
            if attempt == 0 {
                drop(sender);
            } else {
                *self.feed.lock().unwrap() = Some(sender);
            }
            Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_stream_ends() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let feed: Arc<Feed> = Arc::default();
        let local: Arc<LocalStore<u32>> = Arc::new(LocalStore::new());
        let channel = InvalidationChannel::new(
            Topic::new("flaky").unwrap(),
            Box::new(FlakyConnection {
                attempts: attempts.clone(),
                feed: feed.clone(),
            }),
            local.clone(),
        );

        local.put("k", 1, None);
        channel.subscribe().await.unwrap();

        tokio::time::sleep(INITIAL_BACKOFF * 2).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let sender = feed.lock().unwrap().clone().unwrap();
        sender.send(InboundMessage::new("flaky", "k")).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!local.has("k"));

        channel.unsubscribe().await.unwrap();
    }
}
