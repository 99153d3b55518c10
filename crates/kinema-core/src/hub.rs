//! Live update fan-out.
//!
//! Each subscriber owns a bounded mailbox and `publish` only ever
//! enqueues, so delivery to one slow or dead consumer never delays the
//! others nor the ingest path. A subscriber whose mailbox is full is
//! considered dead and dropped.

use dashmap::DashMap;
use kinema_model::LandmarkUpdate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default per-subscriber mailbox capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Identifier for one live subscriber.
pub type SubscriberId = u64;

/// A live subscription handle.
///
/// Receives every update published after the subscription was taken; no
/// history is replayed. Dropping the handle without unsubscribing is fine:
/// the next publish notices the closed mailbox and removes the
/// registration.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<LandmarkUpdate>>,
}

impl Subscription {
    /// This subscription's id, for [`Hub::unsubscribe`].
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next update; `None` once the hub dropped this
    /// subscriber.
    pub async fn recv(&mut self) -> Option<Arc<LandmarkUpdate>> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    ///
    /// # Errors
    ///
    /// Returns the underlying channel error when the mailbox is empty or
    /// closed.
    pub fn try_recv(&mut self) -> Result<Arc<LandmarkUpdate>, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Fan-out hub delivering accepted updates to every live subscriber.
#[derive(Debug)]
pub struct Hub {
    subscribers: DashMap<SubscriberId, mpsc::Sender<Arc<LandmarkUpdate>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Hub {
    /// Create a hub with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a hub with a specific per-subscriber mailbox capacity.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new listener.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers.insert(id, sender);
        debug!(subscriber = id, "Subscriber registered");
        Subscription { id, receiver }
    }

    /// Remove a listener.
    ///
    /// Returns whether the subscriber was registered. Idempotent, and safe
    /// to call concurrently with an in-flight [`Hub::publish`].
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `update` to every currently registered subscriber.
    ///
    /// Returns the number of mailboxes reached. Enqueue only: a full
    /// mailbox marks that subscriber dead and drops it rather than
    /// stalling the publisher; a closed mailbox is cleaned up the same
    /// way.
    pub fn publish(&self, update: LandmarkUpdate) -> usize {
        let update = Arc::new(update);
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(Arc::clone(&update)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = *entry.key(), "Subscriber mailbox full, dropping");
                    dead.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }

        trace!(recipients = delivered, "Published update");
        delivered
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(id: i64) -> LandmarkUpdate {
        LandmarkUpdate {
            id,
            user_id: None,
            name: "live_capture".to_string(),
            frame_count: 1,
            landmarks: json!([[{"x": 0.0, "y": 0.0, "z": 0.0}]]),
            timestamp: "1970-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_publishes_in_order() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();

        assert_eq!(hub.publish(update(1)), 1);
        assert_eq!(hub.publish(update(2)), 1);

        assert_eq!(sub.recv().await.unwrap().id, 1);
        assert_eq!(sub.recv().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let hub = Hub::new();
        hub.publish(update(1));

        let mut sub = hub.subscribe();
        hub.publish(update(2));

        assert_eq!(sub.recv().await.unwrap().id, 2);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_subscriber() {
        let hub = Hub::with_buffer(1);
        let mut slow = hub.subscribe();
        let mut healthy = hub.subscribe();

        assert_eq!(hub.publish(update(1)), 2);
        // `slow` never drains; its mailbox is now full.
        assert_eq!(hub.publish(update(2)), 1);
        assert_eq!(hub.subscriber_count(), 1);

        // The healthy subscriber keeps receiving.
        assert_eq!(healthy.recv().await.unwrap().id, 1);
        assert_eq!(healthy.recv().await.unwrap().id, 2);

        // The dropped one still drains what it had, then ends.
        assert_eq!(slow.recv().await.unwrap().id, 1);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = Hub::new();
        let sub = hub.subscribe();
        let id = sub.id();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_cleaned_on_publish() {
        let hub = Hub::new();
        let sub = hub.subscribe();
        drop(sub);

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(update(1)), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
