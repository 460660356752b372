//! # Live Subscriptions
//!
//! This module fans newly committed records out to live subscribers. The
//! writer calls [`SubscriptionRegistry::notify`] once per committed record,
//! inside its critical section and in commit order, so every subscriber
//! observes strict commit order with no reordering or batching.
//!
//! ## Delivery Model
//!
//! Each registration pairs an address filter with a per-subscriber channel
//! plus a dedicated consumer (the task holding the [`Subscription`]). The
//! writer only enqueues; the subscriber drains at its own pace. This
//! decouples a slow receiver from the writer's critical section: a laggard
//! accumulates buffer, it does not delay commits.
//!
//! ## Backpressure Policy: Buffer-and-Warn
//!
//! Delivery never drops records and never blocks the writer. When a
//! subscriber's queued depth crosses the registry's warn threshold, a
//! `tracing::warn!` fires (once per crossing) so the host can notice the
//! laggard. The buffer is unbounded by design; in an embedded, single-process
//! engine the host owns both sides of the channel and can act on the warning.
//!
//! ## Receiver Isolation
//!
//! A failed delivery (the subscriber dropped its handle) never aborts the
//! commit, since the write already succeeded, and never affects other
//! receivers in the same notification; the dead registration is pruned.
//!
//! ## No Catch-Up
//!
//! Subscriptions deliver no history: only records committed after
//! `subscribe` returns are seen. Replay is the read path's job.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::types::{RecordedEvent, StreamFilter};

// =============================================================================
// Configuration
// =============================================================================

/// Default queued-depth threshold for the buffer-and-warn policy.
pub const DEFAULT_SUBSCRIPTION_WARN_DEPTH: usize = 10_000;

// =============================================================================
// Registry
// =============================================================================

/// One live registration: the filter and the sending half of the
/// subscriber's channel.
struct Subscriber {
    id: u64,
    filter: StreamFilter,
    tx: mpsc::UnboundedSender<RecordedEvent>,
    /// Records enqueued but not yet drained by the subscriber.
    depth: Arc<AtomicUsize>,
    /// Whether the warn threshold has fired for the current crossing.
    warned: bool,
}

struct RegistryInner {
    next_id: u64,
    /// Registration order is preserved; notify walks this in order.
    subscribers: Vec<Subscriber>,
}

/// Registry of live listeners keyed by address filter.
///
/// Subscribe, unsubscribe, and notify serialize on the registry's own lock,
/// which is what makes handle release deterministic: once `unsubscribe`
/// returns, a notification in flight on another thread has either already
/// enqueued for that subscriber or will skip it, never partially applied.
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    warn_depth: usize,
}

impl SubscriptionRegistry {
    /// Creates an empty registry with the given warn threshold.
    pub fn new(warn_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                next_id: 0,
                subscribers: Vec::new(),
            }),
            warn_depth: warn_depth.max(1),
        })
    }

    /// Registers a listener and returns its handle.
    ///
    /// Only records committed after this call returns are delivered.
    pub fn subscribe(self: &Arc<Self>, filter: StreamFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        let mut inner = self.inner.lock().expect("subscription registry lock");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            filter,
            tx,
            depth: Arc::clone(&depth),
            warned: false,
        });

        Subscription {
            rx,
            depth,
            guard: SubscriptionGuard {
                id,
                registry: Arc::clone(self),
            },
        }
    }

    /// Delivers one committed record to every matching subscriber, in
    /// registration order. Called by the writer once per record, in commit
    /// order. Never blocks and never fails the commit.
    pub fn notify(&self, record: &RecordedEvent) {
        let warn_depth = self.warn_depth;
        let mut inner = self.inner.lock().expect("subscription registry lock");
        inner.subscribers.retain_mut(|subscriber| {
            if !subscriber.filter.matches(&record.stream_id) {
                return true;
            }
            match subscriber.tx.send(record.clone()) {
                Ok(()) => {
                    let depth = subscriber.depth.fetch_add(1, Ordering::Relaxed) + 1;
                    if depth >= warn_depth {
                        if !subscriber.warned {
                            subscriber.warned = true;
                            tracing::warn!(
                                subscription = subscriber.id,
                                depth,
                                "subscriber is lagging; buffering committed records"
                            );
                        }
                    } else {
                        subscriber.warned = false;
                    }
                    true
                }
                // Receiver dropped without an explicit unsubscribe; prune and
                // leave the other receivers untouched.
                Err(_) => false,
            }
        });
    }

    /// Releases a registration. Idempotent and safe from any thread.
    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("subscription registry lock");
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Drops every registration's sending half, so each receiver drains its
    /// buffer and then observes end-of-stream. Called at `disconnect()`.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().expect("subscription registry lock");
        inner.subscribers.clear();
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("subscription registry lock")
            .subscribers
            .len()
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Unregisters on drop. Split out of [`Subscription`] so release happens
/// exactly once no matter how the handle goes away.
struct SubscriptionGuard {
    id: u64,
    registry: Arc<SubscriptionRegistry>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

/// A live subscription: the receiving half of the channel plus the scoped
/// unregister token.
///
/// Records arrive in commit order. Dropping the subscription (or calling
/// [`Subscription::unsubscribe`]) releases the registration; no further
/// notifications reach it afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let mut sub = store.subscribe(StreamKey::new(["tenant1", "Orders", "*"])).await?;
/// while let Some(event) = sub.next().await {
///     println!("{} v{}", event.stream_id, event.version);
/// }
/// ```
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<RecordedEvent>,
    depth: Arc<AtomicUsize>,
    #[allow(dead_code)] // held for its Drop impl
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Receives the next committed record, waiting if none is buffered.
    ///
    /// Returns `None` once the store has disconnected and the buffer is
    /// drained.
    pub async fn next(&mut self) -> Option<RecordedEvent> {
        let record = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(record)
    }

    /// Receives the next buffered record without waiting.
    pub fn try_next(&mut self) -> Option<RecordedEvent> {
        let record = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(record)
    }

    /// Records enqueued but not yet received.
    pub fn queued(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Releases the registration explicitly. Equivalent to dropping the
    /// subscription; provided for call sites where the release is the point.
    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = RecordedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(record)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Poll::Ready(Some(record))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogPosition, StreamId, StreamKey, StreamVersion};
    use uuid::Uuid;

    fn recorded(tenant: &str, local: &str, version: u64, position: u64) -> RecordedEvent {
        RecordedEvent {
            stream_id: StreamId::new(tenant, ["Orders"], local),
            event_id: Uuid::new_v4(),
            event_type: "OrderPlaced".to_string(),
            metadata: Vec::new(),
            payload: format!("{}-{}", local, version).into_bytes(),
            version: StreamVersion::from_raw(version),
            position: LogPosition::from_raw(position),
        }
    }

    #[tokio::test]
    async fn test_delivery_in_commit_order() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let mut sub = registry.subscribe(StreamFilter::All);

        for i in 0..3 {
            registry.notify(&recorded("t1", "A", i, i * 100));
        }

        for i in 0..3 {
            let event = sub.next().await.unwrap();
            assert_eq!(event.version.as_raw(), i);
        }
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_filter_skips_non_matching_streams() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let mut sub = registry.subscribe(StreamKey::new(["t1", "Orders", "*"]).into());

        registry.notify(&recorded("t2", "A", 0, 0));
        registry.notify(&recorded("t1", "B", 0, 100));

        let event = sub.next().await.unwrap();
        assert_eq!(event.stream_id.tenant(), "t1");
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_receivers_are_independent() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let mut all = registry.subscribe(StreamFilter::All);
        let mut only_a = registry.subscribe(StreamFilter::from(StreamId::new("t1", ["Orders"], "A")));

        registry.notify(&recorded("t1", "A", 0, 0));
        registry.notify(&recorded("t1", "B", 0, 100));

        assert_eq!(all.next().await.unwrap().stream_id.id(), "A");
        assert_eq!(all.next().await.unwrap().stream_id.id(), "B");
        assert_eq!(only_a.next().await.unwrap().stream_id.id(), "A");
        assert!(only_a.try_next().is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_without_affecting_others() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let dead = registry.subscribe(StreamFilter::All);
        let mut alive = registry.subscribe(StreamFilter::All);
        assert_eq!(registry.subscriber_count(), 2);

        drop(dead);
        registry.notify(&recorded("t1", "A", 0, 0));

        assert_eq!(registry.subscriber_count(), 1);
        assert_eq!(alive.next().await.unwrap().stream_id.id(), "A");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let sub = registry.subscribe(StreamFilter::All);
        assert_eq!(registry.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(registry.subscriber_count(), 0);

        // Notify after release is a no-op.
        registry.notify(&recorded("t1", "A", 0, 0));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_depth_tracks_buffer() {
        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let mut sub = registry.subscribe(StreamFilter::All);

        registry.notify(&recorded("t1", "A", 0, 0));
        registry.notify(&recorded("t1", "A", 1, 100));
        assert_eq!(sub.queued(), 2);

        sub.next().await.unwrap();
        assert_eq!(sub.queued(), 1);
    }

    #[tokio::test]
    async fn test_warn_threshold_does_not_drop_records() {
        // Tiny threshold: delivery keeps buffering past it.
        let registry = SubscriptionRegistry::new(2);
        let mut sub = registry.subscribe(StreamFilter::All);

        for i in 0..10 {
            registry.notify(&recorded("t1", "A", i, i * 100));
        }

        let mut received = 0u64;
        while let Some(event) = sub.try_next() {
            assert_eq!(event.version.as_raw(), received);
            received += 1;
        }
        assert_eq!(received, 10);
    }

    #[tokio::test]
    async fn test_stream_impl_yields_records() {
        use futures::StreamExt;

        let registry = SubscriptionRegistry::new(DEFAULT_SUBSCRIPTION_WARN_DEPTH);
        let mut sub = registry.subscribe(StreamFilter::All);
        registry.notify(&recorded("t1", "A", 0, 0));

        let event = StreamExt::next(&mut sub).await.unwrap();
        assert_eq!(event.version, StreamVersion::FIRST);
    }
}
