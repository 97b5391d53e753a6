use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::debug;

use crate::message::Message;
use crate::message::Value;
use crate::message::property::DELIVERY_COUNT_PROPERTY;
use crate::selector::{self, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Available,
    /// Handed to a consumer, waiting for acknowledgement or requeue.
    Delivered,
}

#[derive(Debug)]
struct StoredMessage {
    seq: u64,
    message: Message,
    state: EntryState,
    delivery_count: u32,
}

impl StoredMessage {
    fn is_due(&self, now_ms: i64) -> bool {
        self.message.delivery_time() <= now_ms
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    next_seq: u64,
    entries: VecDeque<StoredMessage>,
}

impl StoreInner {
    /// Drops available messages whose expiration has passed.
    fn evict_expired(&mut self, name: &str, now_ms: i64) {
        let before = self.entries.len();
        self.entries.retain(|e| {
            e.state != EntryState::Available || !e.message.is_expired_at(now_ms)
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Discarded {} expired message(s) from {}", evicted, name);
        }
    }

    fn position(&self, seq: u64) -> Option<usize> {
        // entries stay sorted by seq
        self.entries.binary_search_by_key(&seq, |e| e.seq).ok()
    }
}

/// Ordered holding area for the messages of one queue or one subscription.
///
/// Messages are kept in arrival order. A message stays in the store from
/// `enqueue` until it is acknowledged; between delivery and acknowledgement it
/// is marked delivered and skipped by `poll`. A requeued message keeps its
/// original position, so it is offered again before anything that arrived
/// after it.
#[derive(Debug)]
pub struct MessageStore {
    name: String,
    inner: Mutex<StoreInner>,
    notify: Notify,
}

impl MessageStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(StoreInner::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a message and wakes every waiting consumer.
    pub fn enqueue(&self, message: Message) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_back(StoredMessage {
                seq,
                message,
                state: EntryState::Available,
                delivery_count: 0,
            });
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    /// Takes the oldest available message that is due, unexpired and accepted
    /// by `selector`, marking it delivered.
    ///
    /// The returned copy carries the redelivered flag and the delivery count.
    pub fn poll(&self, selector: Option<&Selector>, now_ms: i64) -> Option<(u64, Message)> {
        let mut inner = self.inner.lock();
        inner.evict_expired(&self.name, now_ms);

        let entry = inner.entries.iter_mut().find(|e| {
            e.state == EntryState::Available
                && e.is_due(now_ms)
                && selector::accepts(selector, &e.message)
        })?;

        entry.state = EntryState::Delivered;
        entry.delivery_count += 1;

        let mut message = entry.message.clone();
        message.header_mut().redelivered = entry.delivery_count > 1;
        let count = i32::try_from(entry.delivery_count).unwrap_or(i32::MAX);
        message.set_provider_property(DELIVERY_COUNT_PROPERTY, Value::Int(count));
        Some((entry.seq, message))
    }

    /// Makes a delivered message available again; its next delivery is
    /// flagged as a redelivery.
    pub fn requeue(&self, seq: u64) {
        let requeued = {
            let mut inner = self.inner.lock();
            match inner.position(seq) {
                Some(i) => {
                    inner.entries[i].state = EntryState::Available;
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.notify.notify_waiters();
        }
    }

    /// Removes a delivered message for good.
    pub fn acknowledge(&self, seq: u64) {
        let mut inner = self.inner.lock();
        if let Some(i) = inner.position(seq) {
            inner.entries.remove(i);
        }
    }

    /// Snapshot of the available messages accepted by `selector`, oldest
    /// first, without consuming them.
    pub fn browse(&self, selector: Option<&Selector>, now_ms: i64) -> Vec<Message> {
        let mut inner = self.inner.lock();
        inner.evict_expired(&self.name, now_ms);
        inner
            .entries
            .iter()
            .filter(|e| {
                e.state == EntryState::Available
                    && e.is_due(now_ms)
                    && selector::accepts(selector, &e.message)
            })
            .map(|e| e.message.clone())
            .collect()
    }

    /// Earliest future delivery time among available messages, used to time
    /// the next wake-up of a waiting consumer.
    pub fn next_delivery_time(&self, now_ms: i64) -> Option<i64> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Available && !e.is_due(now_ms))
            .map(|e| e.message.delivery_time())
            .min()
    }

    /// Messages not yet delivered, expired ones excluded.
    pub fn depth(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.lock();
        inner.evict_expired(&self.name, now_ms);
        inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Available)
            .count()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Delivered)
            .count()
    }

    /// Drops every message, delivered or not.
    pub fn purge(&self) {
        self.inner.lock().entries.clear();
    }

    /// Future completing on the next enqueue or requeue.
    ///
    /// Enable it before polling so a message arriving in between is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
