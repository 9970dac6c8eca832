//! SSE event fan-out.
//!
//! Publishing never blocks: each subscriber owns a bounded queue and a
//! full queue drops its oldest entry. Subscribers are held by weak
//! reference so a dropped subscription cleans itself up. Shutdown pushes a
//! close sentinel through every queue (and into late subscribers) so
//! streams terminate instead of hanging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{Value, json};
use tokio::sync::Notify;
use tracing::debug;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Keep-alive comment frame.
pub const PING_FRAME: &str = ": ping\n\n";

/// Formats one SSE data frame carrying a typed JSON message.
pub fn sse_frame(event_type: &str, payload: &Value) -> String {
    let message = json!({ "type": event_type, "payload": payload });
    format!("data: {message}\n\n")
}

/// The frame sent first on every new stream.
pub fn ready_frame() -> String {
    sse_frame("ready", &json!({}))
}

/// One subscriber's queue. `None` is the close sentinel.
struct SubscriberQueue {
    messages: Mutex<VecDeque<Option<String>>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn push(&self, message: Option<String>) {
        {
            let mut queue = self.messages.lock().unwrap();
            if queue.len() >= self.capacity {
                // Slow consumer: sacrifice the oldest frame, keep the stream.
                queue.pop_front();
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }
}

/// A handle to one subscriber's stream of frames.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Waits for the next frame. `None` means the broadcaster closed.
    pub async fn recv(&self) -> Option<String> {
        loop {
            {
                let mut queue = self.queue.messages.lock().unwrap();
                if let Some(entry) = queue.pop_front() {
                    return entry;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive. Outer `None` means the queue is empty; inner
    /// `None` is the close sentinel.
    pub fn try_recv(&self) -> Option<Option<String>> {
        self.queue.messages.lock().unwrap().pop_front()
    }
}

/// Fan-out hub for server-sent events.
pub struct EventBroadcaster {
    subscribers: Mutex<Vec<Weak<SubscriberQueue>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new subscriber.
    ///
    /// Subscribing after close yields a queue holding only the sentinel, so
    /// the stream ends immediately instead of waiting forever.
    pub fn subscribe(&self) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.capacity,
        });

        if self.closed.load(Ordering::SeqCst) {
            queue.push(None);
        } else {
            self.subscribers.lock().unwrap().push(Arc::downgrade(&queue));
        }

        Subscription { queue }
    }

    /// Deregisters a subscriber. Idempotent; dropping the subscription has
    /// the same effect.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers.lock().unwrap().retain(|weak| {
            weak.upgrade()
                .is_some_and(|queue| !Arc::ptr_eq(&queue, &subscription.queue))
        });
    }

    /// Publishes a typed message to every live subscriber.
    ///
    /// Synchronous and non-blocking; safe to call from any context.
    pub fn publish(&self, event_type: &str, payload: &Value) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let frame = sse_frame(event_type, payload);
        let delivered = self.fan_out(Some(frame));
        debug!(event_type, subscribers = delivered, "published event");
    }

    /// Closes the broadcaster: every queue gets the sentinel, further
    /// publishes are dropped. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let notified = self.fan_out(None);
        debug!(subscribers = notified, "broadcaster closed");
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.len()
    }

    /// Pushes to every live queue, pruning dead ones. Returns the number of
    /// queues reached.
    fn fan_out(&self, message: Option<String>) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        let mut delivered = 0;
        subscribers.retain(|weak| match weak.upgrade() {
            Some(queue) => {
                queue.push(message.clone());
                delivered += 1;
                true
            }
            None => false,
        });
        delivered
    }
}
