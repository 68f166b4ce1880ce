//! Per-session event fan-out with bounded history and replay.
//!
//! Subscriber queues are unbounded: a slow consumer grows memory rather than
//! losing events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use moltslack_protocol::{Event, EventPayload};
use tokio::sync::mpsc;
use tracing::trace;

use crate::history::EventHistory;

pub const HISTORY_CAPACITY: usize = 2000;
pub const REPLAY_LIMIT: usize = 500;

pub type SubscriberId = u64;

/// A live delivery queue handed out by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the subscription is detached and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

struct BusInner {
    history: EventHistory,
    subscribers: Vec<(SubscriberId, mpsc::UnboundedSender<Event>)>,
}

pub struct EventBus {
    inner: Mutex<BusInner>,
    replay_limit: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(history_capacity: usize, replay_limit: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                history: EventHistory::new(history_capacity),
                subscribers: Vec::new(),
            }),
            replay_limit,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp, record and broadcast an event. Returns the published event.
    pub fn publish(&self, payload: EventPayload) -> Event {
        let event = Event::new(payload, now_ms());
        let mut inner = self.lock();
        inner.history.push(event.clone());
        // A failed send means the receiver was dropped; detach it.
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
        trace!(kind = event.kind().as_str(), subscribers = inner.subscribers.len(), "published");
        event
    }

    /// Register a new subscriber, optionally pre-filled with recent history.
    ///
    /// Replay and registration happen under one lock acquisition, so the
    /// subscriber sees neither a gap nor a duplicate between the two.
    pub fn subscribe(&self, replay: bool) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        if replay {
            for event in inner.history.tail(self.replay_limit) {
                let _ = tx.send(event);
            }
        }
        inner.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.unsubscribe_id(subscription.id);
    }

    /// Detach a subscriber by id. Unknown ids are ignored.
    pub fn unsubscribe_id(&self, id: SubscriberId) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Copy of the last `limit` history events, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<Event> {
        self.lock().history.tail(limit)
    }

    /// Fold over the full history without copying it out.
    pub fn fold_history<T>(&self, init: T, f: impl FnMut(T, &Event) -> T) -> T {
        self.lock().history.iter().fold(init, f)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY, REPLAY_LIMIT)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
