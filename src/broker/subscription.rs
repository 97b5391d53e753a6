use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::broker::destination::Destination;
use crate::broker::store::MessageStore;
use crate::message::{ConnectionId, Message};
use crate::selector::{self, Selector};
use crate::utils::{JmsError, Result};

/// Name and client identifier under which a named subscription is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub name: String,
    pub client_id: Option<String>,
}

impl SubscriptionKey {
    pub fn new(name: impl Into<String>, client_id: Option<&str>) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.map(str::to_string),
        }
    }
}

/// What a consumer asks for when it opens a topic subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub topic: Destination,
    pub selector: Option<Selector>,
    pub no_local: bool,
    pub connection: ConnectionId,
}

impl SubscriptionRequest {
    fn same_config(&self, sub: &Subscription) -> bool {
        self.topic == sub.topic && self.selector == sub.selector && self.no_local == sub.no_local
    }
}

/// A topic subscription and its private message store.
///
/// Every message published to the topic is copied into the store of each
/// subscription whose selector accepts it. Consumers of a shared subscription
/// compete for the messages of the one store.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    key: Option<SubscriptionKey>,
    topic: Destination,
    selector: Option<Selector>,
    no_local: bool,
    shared: bool,
    durable: bool,
    /// Connection whose own messages are skipped when `no_local` is set.
    local_connection: AtomicU64,
    store: Arc<MessageStore>,
    consumers: AtomicUsize,
}

impl Subscription {
    fn new(
        id: u64,
        key: Option<SubscriptionKey>,
        request: &SubscriptionRequest,
        shared: bool,
        durable: bool,
    ) -> Self {
        let label = match &key {
            Some(key) => format!("{}/{}", request.topic, key.name),
            None => format!("{}/#{id}", request.topic),
        };
        Self {
            id,
            key,
            topic: request.topic.clone(),
            selector: request.selector.clone(),
            no_local: request.no_local,
            shared,
            durable,
            local_connection: AtomicU64::new(request.connection),
            store: Arc::new(MessageStore::new(label)),
            consumers: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.key.as_ref().map(|k| k.name.as_str())
    }

    pub fn topic(&self) -> &Destination {
        &self.topic
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    pub(crate) fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    fn attach(&self, connection: ConnectionId) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
        self.local_connection.store(connection, Ordering::SeqCst);
    }

    fn accepts(&self, message: &Message) -> bool {
        let local = self.local_connection.load(Ordering::SeqCst);
        if self.no_local && message.origin == Some(local) {
            return false;
        }
        selector::accepts(self.selector.as_ref(), message)
    }
}

#[derive(Debug, Default)]
struct Subscriptions {
    durable: HashMap<SubscriptionKey, Arc<Subscription>>,
    shared: HashMap<SubscriptionKey, Arc<Subscription>>,
    anonymous: HashMap<u64, Arc<Subscription>>,
}

impl Subscriptions {
    fn all(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.durable
            .values()
            .chain(self.shared.values())
            .chain(self.anonymous.values())
    }
}

/// Tracks every topic subscription and enforces the sharing rules.
///
/// Durable and shared non-durable subscriptions live in separate maps, so the
/// same name and client id may identify one of each without interference.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    inner: Mutex<Subscriptions>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an unshared durable subscription. A client id is required.
    pub fn create_durable(
        &self,
        name: &str,
        client_id: Option<&str>,
        request: SubscriptionRequest,
    ) -> Result<Arc<Subscription>> {
        let Some(client_id) = client_id else {
            return Err(JmsError::illegal_state(
                "an unshared durable subscription requires a client id",
            ));
        };
        let key = SubscriptionKey::new(name, Some(client_id));
        let mut subs = self.inner.lock();
        self.open_named(&mut subs, key, request, false, true)
    }

    /// Opens a shared durable subscription. The client id is optional.
    pub fn create_shared_durable(
        &self,
        name: &str,
        client_id: Option<&str>,
        request: SubscriptionRequest,
    ) -> Result<Arc<Subscription>> {
        let key = SubscriptionKey::new(name, client_id);
        let mut subs = self.inner.lock();
        self.open_named(&mut subs, key, request, true, true)
    }

    /// Opens a shared non-durable subscription, which lives as long as it
    /// has consumers.
    pub fn create_shared_non_durable(
        &self,
        name: &str,
        client_id: Option<&str>,
        request: SubscriptionRequest,
    ) -> Result<Arc<Subscription>> {
        let key = SubscriptionKey::new(name, client_id);
        let mut subs = self.inner.lock();
        self.open_named(&mut subs, key, request, true, false)
    }

    /// Opens a private subscription for a single consumer.
    pub fn create_non_durable(&self, request: SubscriptionRequest) -> Arc<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = Arc::new(Subscription::new(id, None, &request, false, false));
        sub.attach(request.connection);
        self.inner.lock().anonymous.insert(id, sub.clone());
        debug!("Opened subscription #{} on {}", id, request.topic);
        sub
    }

    fn open_named(
        &self,
        subs: &mut Subscriptions,
        key: SubscriptionKey,
        request: SubscriptionRequest,
        shared: bool,
        durable: bool,
    ) -> Result<Arc<Subscription>> {
        let map = if durable {
            &mut subs.durable
        } else {
            &mut subs.shared
        };

        if let Some(existing) = map.get(&key) {
            if existing.shared != shared {
                return Err(JmsError::illegal_state(format!(
                    "subscription '{}' already exists as {}",
                    key.name,
                    if existing.shared { "shared" } else { "unshared" }
                )));
            }
            let active = existing.consumer_count() > 0;
            if request.same_config(existing) {
                if active && !shared {
                    return Err(JmsError::illegal_state(format!(
                        "durable subscription '{}' already has an active consumer",
                        key.name
                    )));
                }
                existing.attach(request.connection);
                return Ok(existing.clone());
            }
            if active {
                return Err(JmsError::illegal_state(format!(
                    "subscription '{}' is in use with a different topic or selector",
                    key.name
                )));
            }
            info!("Replacing subscription '{}' on {}", key.name, existing.topic);
            existing.store.purge();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sub = Arc::new(Subscription::new(
            id,
            Some(key.clone()),
            &request,
            shared,
            durable,
        ));
        sub.attach(request.connection);
        info!(
            "Opened {}{}subscription '{}' on {}",
            if shared { "shared " } else { "" },
            if durable { "durable " } else { "" },
            key.name,
            request.topic
        );
        map.insert(key, sub.clone());
        Ok(sub)
    }

    /// Detaches one consumer. Non-durable subscriptions disappear with their
    /// last consumer.
    pub fn release(&self, sub: &Arc<Subscription>) {
        let mut subs = self.inner.lock();
        let remaining = sub
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .unwrap_or(0);
        if remaining > 0 || sub.durable {
            return;
        }

        match &sub.key {
            Some(key) => {
                if subs.shared.get(key).is_some_and(|s| Arc::ptr_eq(s, sub)) {
                    subs.shared.remove(key);
                }
            }
            None => {
                subs.anonymous.remove(&sub.id);
            }
        }
        debug!("Closed subscription #{} on {}", sub.id, sub.topic);
    }

    /// Deletes a durable subscription and its buffered messages.
    pub fn unsubscribe(&self, name: &str, client_id: Option<&str>) -> Result<()> {
        let key = SubscriptionKey::new(name, client_id);
        let mut subs = self.inner.lock();
        let Some(sub) = subs.durable.get(&key) else {
            return Err(JmsError::InvalidDestination(format!(
                "no durable subscription named '{name}'"
            )));
        };
        if sub.consumer_count() > 0 {
            return Err(JmsError::illegal_state(format!(
                "durable subscription '{name}' has an active consumer"
            )));
        }
        if sub.store.in_flight() > 0 {
            return Err(JmsError::illegal_state(format!(
                "durable subscription '{name}' has unacknowledged messages"
            )));
        }
        if let Some(sub) = subs.durable.remove(&key) {
            sub.store.purge();
        }
        info!("Unsubscribed '{}'", name);
        Ok(())
    }

    /// Copies `message` into every subscription on `topic` that accepts it.
    /// Returns the number of copies made.
    pub fn publish(&self, topic: &Destination, message: &Message) -> usize {
        let targets: Vec<Arc<Subscription>> = self
            .inner
            .lock()
            .all()
            .filter(|s| s.topic == *topic && s.accepts(message))
            .cloned()
            .collect();
        for sub in &targets {
            sub.store.enqueue(message.clone());
        }
        targets.len()
    }

    /// Number of subscriptions on `topic` with at least one consumer.
    pub fn active_on(&self, topic: &Destination) -> usize {
        self.inner
            .lock()
            .all()
            .filter(|s| s.topic == *topic && s.consumer_count() > 0)
            .count()
    }

    /// Drops every subscription on a deleted topic.
    pub(crate) fn remove_topic(&self, topic: &Destination) {
        let mut subs = self.inner.lock();
        subs.durable.retain(|_, s| s.topic != *topic);
        subs.shared.retain(|_, s| s.topic != *topic);
        subs.anonymous.retain(|_, s| s.topic != *topic);
    }

    pub fn find_durable(&self, name: &str, client_id: Option<&str>) -> Option<Arc<Subscription>> {
        self.inner
            .lock()
            .durable
            .get(&SubscriptionKey::new(name, client_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
