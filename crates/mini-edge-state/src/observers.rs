//! Live observer sets.
//!
//! An [`Observers`] set fans events out to any number of subscribers, each
//! with its own bounded queue. Publishing never waits: a full queue drops the
//! event for that subscriber only, and a closed queue removes the subscriber.
//! A [`Subscription`] keeps only a weak reference back to its set and
//! unsubscribes itself when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// A concurrently mutable set of live subscribers.
pub struct Observers<T> {
    next_id: AtomicU64,
    senders: DashMap<u64, mpsc::Sender<T>>,
    queue: usize,
}

impl<T: Clone + Send + 'static> Observers<T> {
    /// Create an empty set whose subscribers buffer up to `queue` events.
    pub fn new(queue: usize) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            senders: DashMap::new(),
            queue: queue.max(1),
        })
    }

    /// Register a new subscriber.
    pub fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue);
        self.senders.insert(id, tx);
        debug!(observer = id, total = self.senders.len(), "observer subscribed");

        Subscription {
            id,
            receiver: rx,
            observers: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.senders.remove(&id).is_some();
        if removed {
            debug!(observer = id, total = self.senders.len(), "observer removed");
        }
        removed
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    pub fn publish(&self, event: &T) -> usize {
        // Snapshot first so no shard lock is held while removing.
        let snapshot: Vec<(u64, mpsc::Sender<T>)> = self
            .senders
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in snapshot {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(observer = id, "observer queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.unsubscribe(id);
                }
            }
        }
        delivered
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Returns `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Handle for one subscriber. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    observers: Weak<Observers<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Identifier of this subscriber within its set.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the set has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Turn the subscription into a stream of events.
    ///
    /// The subscription lives inside the stream, so dropping the stream
    /// unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.senders.remove(&self.id);
            debug!(observer = self.id, "observer dropped");
        }
    }
}
