use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::store::MessageStore;
use crate::message::ConnectionId;
use crate::utils::{JmsError, Result};

/// Names starting with this prefix belong to temporary destinations and
/// cannot be declared.
pub const TEMPORARY_PREFIX: &str = "temporary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Queue,
    Topic,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Queue => f.write_str("queue"),
            DestinationKind::Topic => f.write_str("topic"),
        }
    }
}

/// Identity of a queue or topic.
///
/// Queues and topics live in separate namespaces, so a queue and a topic may
/// share a name without referring to the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
    temporary: bool,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            temporary: false,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
            temporary: false,
        }
    }

    fn new_temporary(kind: DestinationKind) -> Self {
        Self {
            name: format!("{TEMPORARY_PREFIX}{kind}.{}", Uuid::new_v4()),
            kind,
            temporary: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn is_queue(&self) -> bool {
        self.kind == DestinationKind::Queue
    }

    pub fn is_topic(&self) -> bool {
        self.kind == DestinationKind::Topic
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.temporary {
            write!(f, "temp-{}://{}", self.kind, self.name)
        } else {
            write!(f, "{}://{}", self.kind, self.name)
        }
    }
}

/// A registered queue and the store holding its messages.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub(crate) destination: Destination,
    pub(crate) store: Arc<MessageStore>,
    owner: Option<ConnectionId>,
    consumers: AtomicUsize,
}

impl QueueEntry {
    pub(crate) fn attach(&self) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        let _ = self
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }
}

/// A registered topic. Its messages live in the stores of its subscriptions.
#[derive(Debug)]
pub(crate) struct TopicEntry {
    pub(crate) destination: Destination,
    owner: Option<ConnectionId>,
}

#[derive(Debug, Default)]
struct Namespaces {
    queues: HashMap<String, Arc<QueueEntry>>,
    topics: HashMap<String, Arc<TopicEntry>>,
}

/// Maps destination identities to their stores.
///
/// Lookups take a read lock; declaration, creation and deletion take the
/// write lock, so they are serialized against each other and against lookups.
#[derive(Debug, Default)]
pub struct DestinationRegistry {
    inner: RwLock<Namespaces>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a named queue or topic. Declaring an existing destination
    /// returns it unchanged.
    pub fn declare(&self, destination: &Destination) -> Result<Destination> {
        if destination.is_temporary() {
            return Err(JmsError::InvalidDestination(format!(
                "{destination} is temporary and cannot be declared"
            )));
        }
        validate_name(destination.name())?;

        let mut ns = self.inner.write();
        match destination.kind() {
            DestinationKind::Queue => {
                ns.queues
                    .entry(destination.name().to_string())
                    .or_insert_with(|| {
                        info!("Declared {}", destination);
                        new_queue(destination.clone(), None)
                    });
            }
            DestinationKind::Topic => {
                ns.topics
                    .entry(destination.name().to_string())
                    .or_insert_with(|| {
                        info!("Declared {}", destination);
                        new_topic(destination.clone(), None)
                    });
            }
        }
        Ok(destination.clone())
    }

    /// Creates a temporary destination owned by `owner`.
    pub fn create_temporary(&self, kind: DestinationKind, owner: ConnectionId) -> Destination {
        let destination = Destination::new_temporary(kind);
        let mut ns = self.inner.write();
        match kind {
            DestinationKind::Queue => {
                ns.queues.insert(
                    destination.name().to_string(),
                    new_queue(destination.clone(), Some(owner)),
                );
            }
            DestinationKind::Topic => {
                ns.topics.insert(
                    destination.name().to_string(),
                    new_topic(destination.clone(), Some(owner)),
                );
            }
        }
        debug!("Created {} for connection {}", destination, owner);
        destination
    }

    /// Removes a temporary destination. Returns `false` if it was already gone.
    pub(crate) fn remove_temporary(&self, destination: &Destination) -> bool {
        let mut ns = self.inner.write();
        let removed = match destination.kind() {
            DestinationKind::Queue => match ns.queues.remove(destination.name()) {
                Some(queue) => {
                    queue.store.purge();
                    true
                }
                None => false,
            },
            DestinationKind::Topic => ns.topics.remove(destination.name()).is_some(),
        };
        if removed {
            debug!("Deleted {}", destination);
        }
        removed
    }

    /// Connection that owns `destination`, if it is a live temporary.
    pub(crate) fn owner_of(&self, destination: &Destination) -> Option<ConnectionId> {
        let ns = self.inner.read();
        match destination.kind() {
            DestinationKind::Queue => ns.queues.get(destination.name()).and_then(|q| q.owner),
            DestinationKind::Topic => ns.topics.get(destination.name()).and_then(|t| t.owner),
        }
    }

    /// Temporaries created by `owner`.
    pub(crate) fn owned_by(&self, owner: ConnectionId) -> Vec<Destination> {
        let ns = self.inner.read();
        let queues = ns
            .queues
            .values()
            .filter(|q| q.owner == Some(owner))
            .map(|q| q.destination.clone());
        let topics = ns
            .topics
            .values()
            .filter(|t| t.owner == Some(owner))
            .map(|t| t.destination.clone());
        queues.chain(topics).collect()
    }

    /// Looks up a queue, creating it when `auto_create` is set and the
    /// destination is a named one.
    pub(crate) fn queue(&self, destination: &Destination, auto_create: bool) -> Result<Arc<QueueEntry>> {
        let found = self.inner.read().queues.get(destination.name()).cloned();
        if let Some(entry) = found.filter(|e| e.destination == *destination) {
            return Ok(entry);
        }
        if destination.is_temporary() || !auto_create {
            return Err(missing(destination));
        }
        self.declare(destination)?;
        self.inner
            .read()
            .queues
            .get(destination.name())
            .filter(|e| e.destination == *destination)
            .cloned()
            .ok_or_else(|| missing(destination))
    }

    pub(crate) fn topic(&self, destination: &Destination, auto_create: bool) -> Result<Arc<TopicEntry>> {
        let found = self.inner.read().topics.get(destination.name()).cloned();
        if let Some(entry) = found.filter(|e| e.destination == *destination) {
            return Ok(entry);
        }
        if destination.is_temporary() || !auto_create {
            return Err(missing(destination));
        }
        self.declare(destination)?;
        self.inner
            .read()
            .topics
            .get(destination.name())
            .filter(|e| e.destination == *destination)
            .cloned()
            .ok_or_else(|| missing(destination))
    }

    pub fn contains(&self, destination: &Destination) -> bool {
        let ns = self.inner.read();
        match destination.kind() {
            DestinationKind::Queue => ns.queues.contains_key(destination.name()),
            DestinationKind::Topic => ns.topics.contains_key(destination.name()),
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().topics.keys().cloned().collect();
        names.sort();
        names
    }
}

fn new_queue(destination: Destination, owner: Option<ConnectionId>) -> Arc<QueueEntry> {
    Arc::new(QueueEntry {
        store: Arc::new(MessageStore::new(destination.to_string())),
        destination,
        owner,
        consumers: AtomicUsize::new(0),
    })
}

fn new_topic(destination: Destination, owner: Option<ConnectionId>) -> Arc<TopicEntry> {
    Arc::new(TopicEntry { destination, owner })
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(JmsError::InvalidDestination(
            "destination name must not be empty".to_string(),
        ));
    }
    if name.starts_with(TEMPORARY_PREFIX) {
        return Err(JmsError::InvalidDestination(format!(
            "'{name}' uses the reserved prefix '{TEMPORARY_PREFIX}'"
        )));
    }
    Ok(())
}

fn missing(destination: &Destination) -> JmsError {
    if destination.is_temporary() {
        JmsError::InvalidDestination(format!("{destination} has been deleted"))
    } else {
        JmsError::InvalidDestination(format!("{destination} does not exist"))
    }
}
