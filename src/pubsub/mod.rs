use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, RwLock};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

struct SubscriberEntry<M> {
    tx: mpsc::UnboundedSender<M>,
    /// Serializes delivery against unsubscribe. Holds `true` once the
    /// subscriber is closed; deliveries re-check it under the lock and drop.
    gate: Mutex<bool>,
}

/// Handle to a subscriber mailbox. Cheaply cloneable; identity is a
/// process-unique id shared by all clones of the handle.
#[derive(Clone)]
pub struct Subscriber<M> {
    id: u64,
    entry: Arc<SubscriberEntry<M>>,
}

impl<M> Subscriber<M> {
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Subscriber {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            entry: Arc::new(SubscriberEntry {
                tx,
                gate: Mutex::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Registry<M> {
    topics: HashMap<String, HashSet<u64>>,
    /// Reverse index so unsubscribe_all doesn't scan every topic.
    memberships: HashMap<u64, HashSet<String>>,
    entries: HashMap<u64, Arc<SubscriberEntry<M>>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Registry {
            topics: HashMap::new(),
            memberships: HashMap::new(),
            entries: HashMap::new(),
        }
    }
}

/// Process-wide topic→subscriber fan-out. The registry lock guards only
/// membership snapshots; delivery happens outside it.
pub struct PubSub<M> {
    registry: Arc<RwLock<Registry<M>>>,
}

impl<M> Clone for PubSub<M> {
    fn clone(&self) -> Self {
        PubSub {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> Default for PubSub<M> {
    fn default() -> Self {
        PubSub {
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }
}

impl<M: Clone + Send + 'static> PubSub<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `subscriber` to `topic`. Idempotent.
    pub async fn subscribe(&self, topic: &str, subscriber: &Subscriber<M>) {
        if topic.is_empty() {
            return;
        }
        let mut registry = self.registry.write().await;
        registry
            .topics
            .entry(topic.to_owned())
            .or_default()
            .insert(subscriber.id);
        registry
            .memberships
            .entry(subscriber.id)
            .or_default()
            .insert(topic.to_owned());
        registry
            .entries
            .entry(subscriber.id)
            .or_insert_with(|| Arc::clone(&subscriber.entry));
    }

    /// Remove `subscriber` from `topic`, pruning the topic when it empties.
    pub async fn unsubscribe(&self, topic: &str, subscriber: &Subscriber<M>) {
        let mut registry = self.registry.write().await;
        remove_membership(&mut registry, topic, subscriber.id);
    }

    /// Remove `subscriber` from every topic it is in; returns the number of
    /// topics it was removed from. Closes the subscriber's gate so any
    /// delivery still in flight observes it and drops the message.
    pub async fn unsubscribe_all(&self, subscriber: &Subscriber<M>) -> usize {
        let (removed, entry) = {
            let mut registry = self.registry.write().await;
            let Some(topics) = registry.memberships.get(&subscriber.id).cloned() else {
                return 0;
            };
            let entry = registry.entries.get(&subscriber.id).map(Arc::clone);
            for topic in &topics {
                remove_membership(&mut registry, topic, subscriber.id);
            }
            (topics.len(), entry)
        };

        if let Some(entry) = entry {
            *entry.gate.lock().await = true;
        }

        removed
    }

    /// Current subscriber count of `topic`.
    pub async fn len(&self, topic: &str) -> usize {
        self.registry
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Deliver `msg` to every subscriber of `topic` present at the snapshot
    /// moment; returns the snapshot count. Deliveries to distinct
    /// subscribers run concurrently; for a fixed subscriber, messages from
    /// one publisher are enqueued in publish-call order.
    pub async fn publish(&self, topic: &str, msg: M) -> usize {
        let snapshot: Vec<Arc<SubscriberEntry<M>>> = {
            let registry = self.registry.read().await;
            let Some(ids) = registry.topics.get(topic) else {
                return 0;
            };
            ids.iter()
                .filter_map(|id| registry.entries.get(id))
                .map(Arc::clone)
                .collect()
        };

        let count = snapshot.len();
        join_all(snapshot.into_iter().map(|entry| {
            let msg = msg.clone();
            async move {
                let closed = entry.gate.lock().await;
                if !*closed {
                    // The receiver half may already be gone; a failed send
                    // is equivalent to delivering to a closed mailbox.
                    let _ = entry.tx.send(msg);
                }
            }
        }))
        .await;

        count
    }
}

fn remove_membership<M>(registry: &mut Registry<M>, topic: &str, subscriber_id: u64) {
    if let Some(subscribers) = registry.topics.get_mut(topic) {
        subscribers.remove(&subscriber_id);
        if subscribers.is_empty() {
            registry.topics.remove(topic);
        }
    }
    if let Some(topics) = registry.memberships.get_mut(&subscriber_id) {
        topics.remove(topic);
        if topics.is_empty() {
            registry.memberships.remove(&subscriber_id);
            registry.entries.remove(&subscriber_id);
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_subscriber() -> (Subscriber<String>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Subscriber::new(tx), rx)
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers_and_returns_count() {
        let pubsub = PubSub::new();
        let (sub1, mut rx1) = make_subscriber();
        let (sub2, mut rx2) = make_subscriber();

        pubsub.subscribe("topic", &sub1).await;
        pubsub.subscribe("topic", &sub2).await;

        let count = pubsub.publish("topic", "hello".to_owned()).await;
        assert_eq!(count, 2);
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_returns_zero() {
        let pubsub: PubSub<String> = PubSub::new();
        assert_eq!(pubsub.publish("nobody", "msg".to_owned()).await, 0);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let pubsub = PubSub::new();
        let (sub, mut rx) = make_subscriber();

        pubsub.subscribe("topic", &sub).await;
        pubsub.subscribe("topic", &sub).await;

        assert_eq!(pubsub.len("topic").await, 1);
        assert_eq!(pubsub.publish("topic", "once".to_owned()).await, 1);
        assert_eq!(rx.recv().await.unwrap(), "once");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_prunes_empty_topics() {
        let pubsub = PubSub::new();
        let (sub, mut rx) = make_subscriber();

        pubsub.subscribe("topic", &sub).await;
        pubsub.unsubscribe("topic", &sub).await;

        assert_eq!(pubsub.len("topic").await, 0);
        assert_eq!(pubsub.publish("topic", "dropped".to_owned()).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_returns_topic_count_and_silences_subscriber() {
        let pubsub = PubSub::new();
        let (sub, mut rx) = make_subscriber();

        pubsub.subscribe("a", &sub).await;
        pubsub.subscribe("b", &sub).await;
        pubsub.subscribe("c", &sub).await;

        assert_eq!(pubsub.unsubscribe_all(&sub).await, 3);
        assert_eq!(pubsub.unsubscribe_all(&sub).await, 0);

        for topic in ["a", "b", "c"] {
            assert_eq!(pubsub.publish(topic, "dropped".to_owned()).await, 0);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_leaves_other_subscribers_alone() {
        let pubsub = PubSub::new();
        let (leaving, _leaving_rx) = make_subscriber();
        let (staying, mut staying_rx) = make_subscriber();

        pubsub.subscribe("topic", &leaving).await;
        pubsub.subscribe("topic", &staying).await;
        pubsub.unsubscribe_all(&leaving).await;

        assert_eq!(pubsub.len("topic").await, 1);
        assert_eq!(pubsub.publish("topic", "still here".to_owned()).await, 1);
        assert_eq!(staying_rx.recv().await.unwrap(), "still here");
    }

    #[tokio::test]
    async fn single_publisher_messages_arrive_in_order() {
        let pubsub = PubSub::new();
        let (sub, mut rx) = make_subscriber();
        pubsub.subscribe("topic", &sub).await;

        for i in 0..100 {
            pubsub.publish("topic", format!("msg-{i}")).await;
        }

        for i in 0..100 {
            assert_eq!(rx.recv().await.unwrap(), format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn closed_mailbox_does_not_fail_publish() {
        let pubsub = PubSub::new();
        let (sub, rx) = make_subscriber();
        pubsub.subscribe("topic", &sub).await;
        drop(rx);

        // Snapshot still counts the subscriber; the send is a no-op.
        assert_eq!(pubsub.publish("topic", "void".to_owned()).await, 1);
    }
}
