//! # Weft Bus
//!
//! In-process topic bus: a bounded FIFO queue drained by a single background
//! consumer task. Programs use it for out-of-band notifications between
//! agents; delivery is best-effort (a full queue drops the message) and
//! subscriber panics are contained so one faulty handler cannot starve the
//! rest or kill the consumer.
//!
//! For a fixed topic, subscribers observe messages in publish order. Across
//! topics the only guarantee is single-consumer serialization.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Default bound on the message queue.
pub const DEFAULT_CAPACITY: usize = 8192;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// A registered topic callback. Receives the message payload; panics are
/// caught by the consumer.
pub type Subscriber = Arc<dyn Fn(Value) + Send + Sync>;

struct BusShared {
    subs: RwLock<HashMap<String, Vec<Subscriber>>>,
    stop: AtomicBool,
    stop_notify: Notify,
    dropped: AtomicU64,
}

impl BusShared {
    fn dispatch(&self, topic: &str, payload: Value) {
        // Snapshot so subscribers registered mid-dispatch see only later
        // messages.
        let subs = self
            .subs
            .read()
            .expect("subscriber table lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default();
        for sub in subs {
            let payload = payload.clone();
            if catch_unwind(AssertUnwindSafe(|| sub(payload))).is_err() {
                tracing::warn!(topic = %topic, "bus subscriber panicked");
            }
        }
    }
}

/// Topic-based event bus with a bounded queue and one consumer task.
///
/// Must be created inside a tokio runtime; the consumer is spawned on
/// construction.
pub struct EventBus {
    shared: Arc<BusShared>,
    tx: mpsc::Sender<(String, Value)>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose queue holds at most `capacity` messages (clamped
    /// to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, Value)>(capacity.max(1));
        let shared = Arc::new(BusShared {
            subs: RwLock::new(HashMap::new()),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });

        let consumer_shared = shared.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some((topic, payload)) => consumer_shared.dispatch(&topic, payload),
                        None => break,
                    },
                    _ = consumer_shared.stop_notify.notified() => {}
                }
                if consumer_shared.stop.load(Ordering::Acquire) {
                    break;
                }
            }
            tracing::debug!("bus consumer exited");
        });

        Self {
            shared,
            tx,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Register `f` for `topic`. Subscriptions are additive and permanent;
    /// registration order is delivery order within a message.
    pub fn subscribe(&self, topic: &str, f: impl Fn(Value) + Send + Sync + 'static) {
        self.shared
            .subs
            .write()
            .expect("subscriber table lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(f));
    }

    /// Non-blocking publish. On a full queue the message is dropped and the
    /// drop counter incremented; the caller is never failed.
    pub fn publish(&self, topic: &str, payload: Value) {
        if self.tx.try_send((topic.to_string(), payload)).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(topic = %topic, "bus queue full, message dropped");
        }
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Cooperative shutdown: flags the consumer to stop and waits for it
    /// briefly. Messages still queued are discarded.
    pub async fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        // notify_one stores a permit, so the consumer wakes even if it has
        // not reached its select yet.
        self.shared.stop_notify.notify_one();
        let handle = self
            .consumer
            .lock()
            .expect("consumer handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("bus consumer did not stop within grace period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let f = move |payload: Value| {
            sink.lock().expect("collector lock poisoned").push(payload);
        };
        (seen, f)
    }

    #[tokio::test]
    async fn delivers_in_publish_order_to_all_subscribers() {
        let bus = EventBus::new(DEFAULT_CAPACITY);
        let (seen1, f1) = collector();
        let (seen2, f2) = collector();
        bus.subscribe("T", f1);
        bus.subscribe("T", f2);

        bus.publish("T", json!("m1"));
        bus.publish("T", json!("m2"));
        settle().await;

        let expected = vec![json!("m1"), json!("m2")];
        assert_eq!(*seen1.lock().expect("lock"), expected);
        assert_eq!(*seen2.lock().expect("lock"), expected);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_messages() {
        let bus = EventBus::new(DEFAULT_CAPACITY);
        let (seen1, f1) = collector();
        bus.subscribe("T", f1);

        bus.publish("T", json!("m1"));
        // Wait until m1 has actually been dispatched before registering s3,
        // otherwise it might still observe m1.
        for _ in 0..100 {
            if !seen1.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen1.lock().expect("lock"), vec![json!("m1")]);

        let (seen3, f3) = collector();
        bus.subscribe("T", f3);
        bus.publish("T", json!("m2"));
        settle().await;

        assert_eq!(*seen1.lock().expect("lock"), vec![json!("m1"), json!("m2")]);
        assert_eq!(*seen3.lock().expect("lock"), vec![json!("m2")]);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new(DEFAULT_CAPACITY);
        let (seen_a, fa) = collector();
        let (seen_b, fb) = collector();
        bus.subscribe("a", fa);
        bus.subscribe("b", fb);

        bus.publish("a", json!(1));
        bus.publish("b", json!(2));
        settle().await;

        assert_eq!(*seen_a.lock().expect("lock"), vec![json!(1)]);
        assert_eq!(*seen_b.lock().expect("lock"), vec![json!(2)]);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let bus = EventBus::new(DEFAULT_CAPACITY);
        bus.subscribe("T", |_| panic!("boom"));
        let (seen, f) = collector();
        bus.subscribe("T", f);

        bus.publish("T", json!("m1"));
        bus.publish("T", json!("m2"));
        settle().await;

        assert_eq!(*seen.lock().expect("lock"), vec![json!("m1"), json!("m2")]);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn burst_publish_on_tiny_queue_drops_overflow() {
        let bus = EventBus::new(1);
        // A slow subscriber keeps the consumer busy so the queue stays full.
        bus.subscribe("T", |_| std::thread::sleep(Duration::from_millis(20)));

        for i in 0..50 {
            bus.publish("T", json!(i));
        }
        assert!(bus.dropped() > 0, "expected overflow drops");
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_silently_discarded() {
        let bus = EventBus::new(4);
        bus.shutdown().await;
        bus.publish("T", json!("late"));
        // Nothing to assert beyond "no panic"; the message lands in the
        // closed queue or the drop counter.
    }
}
