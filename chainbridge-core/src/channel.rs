//! Keyed multicast channel
//!
//! Each key owns a topic with one bounded queue per subscriber. Values
//! published to a key reach every subscriber attached at that moment; there
//! is no replay, and a value published with nobody attached is dropped.
//! Publishing waits while any subscriber's queue is full, so a slow reader
//! holds the publisher back instead of losing values. Topics are created
//! lazily and removed when the last subscriber and the last waiter detach.
//!
//! The map lock is held only while a topic is looked up and its counters are
//! adjusted, so the decision to remove a topic always sees a consistent
//! subscriber count.

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::trace;

struct Topic<V> {
    senders: Mutex<Vec<mpsc::Sender<V>>>,
    subscribers: AtomicUsize,
    waiters: AtomicUsize,
    closed: AtomicBool,
    attached: Notify,
}

impl<V> Topic<V> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            subscribers: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            attached: Notify::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.load(Ordering::Acquire) == 0 && self.waiters.load(Ordering::Acquire) == 0
    }

    /// Drop the queues of subscribers that went away.
    fn prune(&self) {
        self.senders.lock().retain(|tx| !tx.is_closed());
    }
}

struct Topics<K, V> {
    map: Mutex<HashMap<K, Arc<Topic<V>>>>,
    capacity: usize,
}

impl<K, V> Topics<K, V>
where
    K: Eq + Hash + Clone,
{
    fn get_or_create(&self, map: &mut HashMap<K, Arc<Topic<V>>>, key: &K) -> Arc<Topic<V>> {
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }

    /// Undo one subscriber or waiter registration on `topic`, if it is still
    /// the live topic for `key`.
    fn release(&self, key: &K, topic: &Weak<Topic<V>>, counter: impl Fn(&Topic<V>) -> &AtomicUsize) {
        let mut map = self.map.lock();
        let Some(live) = map.get(key) else {
            return;
        };
        if !Weak::ptr_eq(&Arc::downgrade(live), topic) {
            return;
        }
        counter(live).fetch_sub(1, Ordering::AcqRel);
        live.prune();
        if live.is_idle() {
            map.remove(key);
        }
    }
}

/// Map from key to multicast topic
pub struct MulticastChannel<K, V> {
    topics: Arc<Topics<K, V>>,
}

impl<K, V> Clone for MulticastChannel<K, V> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<K, V> MulticastChannel<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// `capacity` is how many values a subscriber may have unread before
    /// [`publish`](Self::publish) waits for it.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Topics {
                map: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Attach a subscriber to `key` right away.
    pub fn attach(&self, key: &K) -> Subscription<K, V> {
        let (tx, rx) = mpsc::channel(self.topics.capacity);
        let topic = {
            let mut map = self.topics.map.lock();
            let topic = self.topics.get_or_create(&mut map, key);
            topic.subscribers.fetch_add(1, Ordering::AcqRel);
            topic.senders.lock().push(tx);
            topic
        };
        topic.attached.notify_waiters();

        Subscription {
            rx,
            key: key.clone(),
            topic: Arc::downgrade(&topic),
            topics: Arc::clone(&self.topics),
        }
    }

    /// Lazy stream of values for `key`.
    ///
    /// Nothing is attached until the stream is first polled, and each call
    /// yields an independent subscription. The stream ends when the key is
    /// closed.
    pub fn subscribe(&self, key: K) -> BoxStream<'static, V> {
        let channel = self.clone();
        async_stream::stream! {
            let mut subscription = channel.attach(&key);
            while let Some(value) = subscription.recv().await {
                yield value;
            }
        }
        .boxed()
    }

    /// Deliver `value` to the current subscribers of `key`.
    ///
    /// Waits until every subscriber has room for it. Subscribers that detach
    /// meanwhile are skipped. Returns how many subscribers it reached; 0
    /// means it was dropped.
    pub async fn publish(&self, key: &K, value: V) -> usize {
        let Some(topic) = self.topics.map.lock().get(key).cloned() else {
            return 0;
        };
        let senders = topic.senders.lock().clone();

        let mut reached = 0;
        let mut gone = 0;
        for tx in &senders {
            match tx.send(value.clone()).await {
                Ok(()) => reached += 1,
                Err(_) => gone += 1,
            }
        }
        if gone > 0 {
            trace!(gone, "pruning detached subscribers");
            topic.prune();
        }
        reached
    }

    /// Suspend until `key` has at least one subscriber, or is closed.
    ///
    /// Returns at once if a subscriber is already attached. There is no
    /// timeout; wrap the call if bounded waiting is needed.
    pub async fn wait_for_subscriber(&self, key: &K) {
        let topic = {
            let mut map = self.topics.map.lock();
            let topic = self.topics.get_or_create(&mut map, key);
            if topic.subscribers.load(Ordering::Acquire) > 0 {
                return;
            }
            topic.waiters.fetch_add(1, Ordering::AcqRel);
            topic
        };
        let _waiter = WaiterGuard {
            key: key.clone(),
            topic: Arc::downgrade(&topic),
            topics: Arc::clone(&self.topics),
        };

        loop {
            let notified = topic.attached.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if topic.subscribers.load(Ordering::Acquire) > 0 || topic.closed.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Remove the topic for `key`. Attached subscriptions end once they have
    /// read what was already queued for them, and pending
    /// `wait_for_subscriber` calls return.
    pub fn close(&self, key: &K) -> bool {
        let Some(topic) = self.topics.map.lock().remove(key) else {
            return false;
        };
        topic.closed.store(true, Ordering::Release);
        topic.senders.lock().clear();
        topic.attached.notify_waiters();
        true
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.topics
            .map
            .lock()
            .get(key)
            .map_or(0, |topic| topic.subscribers.load(Ordering::Acquire))
    }

    /// Number of keys with a live topic
    pub fn topic_count(&self) -> usize {
        self.topics.map.lock().len()
    }
}

/// An attached receiver for one key. Detaches on drop.
pub struct Subscription<K, V>
where
    K: Eq + Hash + Clone,
{
    rx: mpsc::Receiver<V>,
    key: K,
    topic: Weak<Topic<V>>,
    topics: Arc<Topics<K, V>>,
}

impl<K, V> Subscription<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Next value, or `None` once the key is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<V> {
        self.rx.recv().await
    }
}

impl<K, V> Drop for Subscription<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Closing first lets `release` prune this subscriber's queue and
        // fails a publish that is waiting on it.
        self.rx.close();
        self.topics
            .release(&self.key, &self.topic, |topic| &topic.subscribers);
    }
}

struct WaiterGuard<K, V>
where
    K: Eq + Hash + Clone,
{
    key: K,
    topic: Weak<Topic<V>>,
    topics: Arc<Topics<K, V>>,
}

impl<K, V> Drop for WaiterGuard<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.topics.release(&self.key, &self.topic, |topic| &topic.waiters);
    }
}
