//! Topic-based broadcast of rendered fragments to browser event streams.
//!
//! Every subscriber declares its topics at connection time and owns a bounded
//! channel; publishes never block on a slow subscriber, a full channel just
//! drops the event for that subscriber. Subscriptions unsubscribe on drop, so
//! a closed browser tab disappears from the table as soon as its stream ends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

/// Topic every subscriber implicitly joins.
pub const DEFAULT_TOPIC: &str = "default";
/// Topic carrying chat-list fragments.
pub const CHATS_TOPIC: &str = "chats";

/// The topic carrying one message's streamed fragments.
pub fn message_topic(message_id: &str) -> String {
    format!("message-{message_id}")
}

/// A broker event, tagged the way it goes out on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// HTML fragment listing all chats.
    Chats(String),
    /// Rendered HTML fragment for one message.
    Messages(String),
    /// Terminal marker for a per-message stream.
    CloseMessage,
    /// Shutdown-wide marker.
    CloseChat,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Chats(_) => "chats",
            Event::Messages(_) => "messages",
            Event::CloseMessage => "closeMessage",
            Event::CloseChat => "closeChat",
        }
    }

    pub fn data(&self) -> &str {
        match self {
            Event::Chats(data) | Event::Messages(data) => data,
            // Spec-compliant clients do not dispatch events without data.
            Event::CloseMessage | Event::CloseChat => "bye",
        }
    }
}

struct Subscriber {
    id: u64,
    topics: HashSet<String>,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
pub struct EventBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// A live subscription. Dropping it removes the subscriber from the broker.
pub struct Subscription {
    id: u64,
    pub rx: mpsc::Receiver<Event>,
    broker: Arc<EventBroker>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.remove(self.id);
    }
}

const SUBSCRIBER_BUFFER: usize = 256;
const DRAIN_GRACE: Duration = Duration::from_secs(5);

impl EventBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the given topics (the default topic is always included).
    pub fn subscribe(self: &Arc<Self>, topics: impl IntoIterator<Item = String>) -> Subscription {
        let mut topic_set: HashSet<String> = topics.into_iter().collect();
        topic_set.insert(DEFAULT_TOPIC.to_string());

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber {
            id,
            topics: topic_set,
            tx,
        });
        Subscription {
            id,
            rx,
            broker: Arc::clone(self),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|s| s.id != id);
    }

    /// Deliver an event, in publish order, to every current subscriber of the
    /// topic. Subscribers that cannot keep up miss the event.
    pub fn publish(&self, topic: &str, event: Event) {
        let mut dead = Vec::new();
        {
            let subscribers = self.lock();
            for sub in subscribers.iter().filter(|s| s.topics.contains(topic)) {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(topic, subscriber = sub.id, "dropping event for slow subscriber");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(sub.id),
                }
            }
        }
        if !dead.is_empty() {
            self.lock().retain(|s| !dead.contains(&s.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Broadcast `closeChat` and wait up to five seconds for subscribers to
    /// drain before forcibly clearing the table.
    pub async fn shutdown(&self) {
        self.publish(DEFAULT_TOPIC, Event::CloseChat);

        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while self.subscriber_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.lock().clear();
    }
}
