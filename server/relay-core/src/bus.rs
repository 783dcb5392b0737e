use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use relay_types::config::timeouts;
use relay_types::session::CONTEXT_SEPARATOR;
use relay_types::Event;
use tokio::sync::Notify;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Fan-out of typed events to session-scoped subscribers.
///
/// Publish never blocks the producer. Each subscriber owns a bounded
/// queue; under pressure the oldest queued event of the incoming type is
/// coalesced away for the high-frequency types (`task_updated`,
/// `message_chunk`). Terminal events are always enqueued, even past
/// capacity. A subscriber that has not drained for the slow-subscriber
/// window is evicted and the eviction logged server-side.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: DashMap<u64, Arc<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
    slow_timeout: Duration,
}

struct Subscriber {
    id: u64,
    session_id: String,
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
    closed: AtomicBool,
}

struct SubscriberQueue {
    events: VecDeque<Event>,
    last_drained: Instant,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, timeouts::SLOW_SUBSCRIBER)
    }
}

impl EventBus {
    pub fn new(capacity: usize, slow_timeout: Duration) -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity,
                slow_timeout,
            }),
        }
    }

    /// Deliver to every subscriber whose session owns the event: partition
    /// key match, or a context id under the subscriber's session.
    pub fn publish(&self, event: Event) {
        let mut evicted = Vec::new();
        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(&event) {
                continue;
            }
            if subscriber.enqueue(event.clone(), self.inner.capacity, self.inner.slow_timeout) {
                subscriber.notify.notify_one();
            } else {
                evicted.push(subscriber.id);
            }
        }
        for id in evicted {
            if let Some((_, subscriber)) = self.inner.subscribers.remove(&id) {
                tracing::error!(
                    session_id = %subscriber.session_id,
                    subscriber_id = id,
                    "evicting slow event subscriber"
                );
                subscriber.close();
            }
        }
    }

    /// Subscribe to every event of a session. Dropping the returned
    /// [`Subscription`] unsubscribes.
    pub fn subscribe(&self, session_id: &str) -> (EventReceiver, Subscription) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            session_id: session_id.to_string(),
            queue: Mutex::new(SubscriberQueue {
                events: VecDeque::new(),
                last_drained: Instant::now(),
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.inner.subscribers.insert(id, subscriber.clone());
        (
            EventReceiver {
                subscriber: subscriber.clone(),
            },
            Subscription {
                bus: self.inner.clone(),
                id,
                subscriber,
            },
        )
    }

    /// Drain and disconnect every subscriber bound to a session.
    pub fn close(&self, session_id: &str) {
        let ids: Vec<u64> = self
            .inner
            .subscribers
            .iter()
            .filter(|e| e.value().session_id == session_id)
            .map(|e| e.value().id)
            .collect();
        for id in ids {
            if let Some((_, subscriber)) = self.inner.subscribers.remove(&id) {
                subscriber.close();
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl Subscriber {
    fn wants(&self, event: &Event) -> bool {
        event.partition_key == self.session_id
            || event
                .context_id
                .strip_prefix(&self.session_id)
                .map(|rest| rest.starts_with(CONTEXT_SEPARATOR))
                .unwrap_or(false)
    }

    /// Returns false when the subscriber should be evicted instead.
    fn enqueue(&self, event: Event, capacity: usize, slow_timeout: Duration) -> bool {
        let mut queue = self.queue.lock().expect("subscriber queue poisoned");
        if queue.events.len() >= capacity {
            if queue.last_drained.elapsed() > slow_timeout {
                return false;
            }
            if !event.event_type.is_terminal() {
                let incoming = event.event_type;
                let dropped = remove_first(&mut queue.events, |e| {
                    e.event_type == incoming && e.event_type.coalescable()
                }) || remove_first(&mut queue.events, |e| e.event_type.coalescable());
                if !dropped {
                    // Nothing droppable and the incoming event is expendable.
                    return true;
                }
            }
        }
        queue.events.push_back(event);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

fn remove_first<F: Fn(&Event) -> bool>(events: &mut VecDeque<Event>, pred: F) -> bool {
    if let Some(pos) = events.iter().position(|e| pred(e)) {
        events.remove(pos);
        true
    } else {
        false
    }
}

pub struct EventReceiver {
    subscriber: Arc<Subscriber>,
}

impl EventReceiver {
    /// Next event in publication order, or `None` once the subscription is
    /// closed and fully drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            {
                let mut queue = self
                    .subscriber
                    .queue
                    .lock()
                    .expect("subscriber queue poisoned");
                if let Some(event) = queue.events.pop_front() {
                    queue.last_drained = Instant::now();
                    return Some(event);
                }
                if self.subscriber.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.subscriber.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        let mut queue = self
            .subscriber
            .queue
            .lock()
            .expect("subscriber queue poisoned");
        let event = queue.events.pop_front();
        if event.is_some() {
            queue.last_drained = Instant::now();
        }
        event
    }
}

/// RAII unsubscribe handle.
pub struct Subscription {
    bus: Arc<BusInner>,
    id: u64,
    subscriber: Arc<Subscriber>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
        self.subscriber.close();
    }
}
