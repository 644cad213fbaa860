//! In-process event stream.
//!
//! Backpressure policy: every subscription owns a bounded channel of
//! `buffer` events. `publish` offers the event to all subscriptions of the user
//! at once and waits at most `send_timeout` for each of them. A subscription
//! that is still full after that misses the event (logged at warn). A stalled
//! subscriber therefore never fails `publish` and delays the user's other
//! subscriptions by at most `send_timeout`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parley_core::UserId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::stream::{EventStream, StreamError, Subscription};

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Capacity of each subscription channel.
    pub buffer: usize,
    /// Per-subscription delivery deadline inside `publish`.
    pub send_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer: 32,
            send_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Debug, Default)]
struct Registry {
    closed: bool,
    by_user: HashMap<UserId, Vec<Subscriber>>,
}

impl Registry {
    fn remove(&mut self, user_id: UserId, ids: &[u64]) {
        if let Some(subs) = self.by_user.get_mut(&user_id) {
            subs.retain(|s| !ids.contains(&s.id));
            if subs.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    registry: RwLock<Registry>,
    settings: StreamSettings,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Per-user in-memory pub/sub. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryEventStream {
    inner: Arc<Inner>,
}

impl InMemoryEventStream {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                settings: StreamSettings {
                    buffer: settings.buffer.max(1),
                    ..settings
                },
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Number of live subscriptions for `user_id`.
    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.inner
            .registry
            .read()
            .map(|r| r.by_user.get(&user_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for InMemoryEventStream {
    fn default() -> Self {
        Self::new(StreamSettings::default())
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    fn subscribe(
        &self,
        user_id: UserId,
        cancel: CancellationToken,
    ) -> Result<Subscription, StreamError> {
        let (tx, rx) = mpsc::channel(self.inner.settings.buffer);
        let watch = tx.clone();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut registry = self
                .inner
                .registry
                .write()
                .map_err(|_| StreamError::Poisoned)?;
            if registry.closed {
                return Err(StreamError::Closed);
            }
            registry
                .by_user
                .entry(user_id)
                .or_default()
                .push(Subscriber { id, tx });
        }

        // Dropping the registry's sender is what ends the subscription. The
        // watcher holds a sender too, so it must exit on every path.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Ok(mut registry) = inner.registry.write() {
                        registry.remove(user_id, &[id]);
                    }
                    debug!(user_id = %user_id, subscription = id, "subscription cancelled");
                }
                _ = watch.closed() => {
                    if let Ok(mut registry) = inner.registry.write() {
                        registry.remove(user_id, &[id]);
                    }
                    debug!(user_id = %user_id, subscription = id, "subscription dropped");
                }
                _ = inner.shutdown.cancelled() => {}
            }
        });

        debug!(user_id = %user_id, subscription = id, "subscribed");
        Ok(Subscription::new(user_id, rx))
    }

    async fn publish(&self, user_id: UserId, event: Event) -> Result<(), StreamError> {
        event.validate()?;

        let targets: Vec<(u64, mpsc::Sender<Event>)> = {
            let registry = self
                .inner
                .registry
                .read()
                .map_err(|_| StreamError::Poisoned)?;
            if registry.closed {
                return Ok(());
            }
            match registry.by_user.get(&user_id) {
                Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return Ok(()),
            }
        };

        let timeout = self.inner.settings.send_timeout;
        let sends = targets.iter().map(|(id, tx)| {
            let event = event.clone();
            async move { (*id, tx.send_timeout(event, timeout).await) }
        });

        let mut gone = Vec::new();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(dropped)) => {
                    warn!(
                        user_id = %user_id,
                        subscription = id,
                        event_type = %dropped.event_type(),
                        event_id = %dropped.core().event_id,
                        "subscriber too slow, event dropped"
                    );
                }
                Err(SendTimeoutError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut registry = self
                .inner
                .registry
                .write()
                .map_err(|_| StreamError::Poisoned)?;
            registry.remove(user_id, &gone);
        }

        Ok(())
    }

    fn close(&self) -> Result<(), StreamError> {
        let mut registry = self
            .inner
            .registry
            .write()
            .map_err(|_| StreamError::Poisoned)?;
        if registry.closed {
            return Ok(());
        }
        registry.closed = true;
        registry.by_user.clear();
        self.inner.shutdown.cancel();
        info!("event stream closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{MessageSentEvent, NewChatEvent};
    use parley_core::{ChatId, MessageId, RequestId};
    use std::time::Instant;

    fn sent_event() -> Event {
        MessageSentEvent::new(RequestId::new(), MessageId::new()).into()
    }

    #[tokio::test]
    async fn publish_reaches_every_subscription_of_the_user_only() {
        let stream = InMemoryEventStream::default();
        let alice = UserId::new();
        let bob = UserId::new();

        let mut a1 = stream.subscribe(alice, CancellationToken::new()).unwrap();
        let mut a2 = stream.subscribe(alice, CancellationToken::new()).unwrap();
        let mut b = stream.subscribe(bob, CancellationToken::new()).unwrap();

        let event = sent_event();
        stream.publish(alice, event.clone()).await.unwrap();

        assert_eq!(a1.recv().await.unwrap(), event);
        assert_eq!(a2.recv().await.unwrap(), event);
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_event_is_rejected_and_not_delivered() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let mut sub = stream.subscribe(user, CancellationToken::new()).unwrap();

        let invalid: Event = NewChatEvent::new(RequestId::new(), ChatId::nil(), user, true).into();
        let err = stream.publish(user, invalid).await.unwrap_err();

        assert!(matches!(err, StreamError::Invalid(_)));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelling_the_token_ends_the_subscription() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let cancel = CancellationToken::new();
        let mut sub = stream.subscribe(user, cancel.clone()).unwrap();

        cancel.cancel();

        assert_eq!(sub.recv().await, None);
        assert_eq!(stream.subscriber_count(user), 0);
    }

    #[tokio::test]
    async fn close_ends_all_subscriptions_and_silences_publish() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let mut s1 = stream.subscribe(user, CancellationToken::new()).unwrap();
        let mut s2 = stream.subscribe(UserId::new(), CancellationToken::new()).unwrap();

        stream.close().unwrap();
        stream.close().unwrap();

        assert_eq!(s1.recv().await, None);
        assert_eq!(s2.recv().await, None);
        assert!(stream.publish(user, sent_event()).await.is_ok());
        assert!(matches!(
            stream.subscribe(user, CancellationToken::new()),
            Err(StreamError::Closed)
        ));
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_hold_back_the_others() {
        let stream = InMemoryEventStream::new(StreamSettings {
            buffer: 1,
            send_timeout: Duration::from_millis(50),
        });
        let user = UserId::new();
        let _stalled = stream.subscribe(user, CancellationToken::new()).unwrap();
        let mut reader = stream.subscribe(user, CancellationToken::new()).unwrap();

        let started = Instant::now();
        for _ in 0..3 {
            stream.publish(user, sent_event()).await.unwrap();
            assert!(reader.recv().await.is_some());
        }

        // Only publishes after the stalled buffer filled wait for the timeout.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let sub = stream.subscribe(user, CancellationToken::new()).unwrap();
        drop(sub);

        stream.publish(user, sent_event()).await.unwrap();

        assert_eq!(stream.subscriber_count(user), 0);
    }

    #[tokio::test]
    async fn dropping_the_subscription_unregisters_it_without_publish() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let cancel = CancellationToken::new();
        let sub = stream.subscribe(user, cancel.clone()).unwrap();
        assert_eq!(stream.subscriber_count(user), 1);

        drop(sub);

        tokio::time::timeout(Duration::from_secs(1), async {
            while stream.subscriber_count(user) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dropped subscription is still registered");
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn per_subscription_order_is_preserved() {
        let stream = InMemoryEventStream::default();
        let user = UserId::new();
        let mut sub = stream.subscribe(user, CancellationToken::new()).unwrap();

        let events: Vec<Event> = (0..5).map(|_| sent_event()).collect();
        for e in &events {
            stream.publish(user, e.clone()).await.unwrap();
        }

        for expected in events {
            assert_eq!(sub.recv().await.unwrap(), expected);
        }
    }
}
