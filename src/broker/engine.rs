use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::destination::{Destination, DestinationKind, DestinationRegistry, QueueEntry};
use crate::broker::subscription::SubscriptionManager;
use crate::config::Settings;
use crate::message::{ConnectionId, Message};
use crate::utils::{JmsError, Result, now_millis};

/// Callbacks a live connection registers with the broker.
pub(crate) trait ConnectionEvents: Send + Sync {
    /// Reports a failure that ends the connection.
    fn on_failure(&self, error: JmsError);
}

/// Where a message goes once its destination has been resolved.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    Queue(Arc<QueueEntry>),
    Topic(Destination),
}

/// Represents the in-memory messaging engine shared by all connections.
///
/// The broker owns the destination registry and the subscription manager,
/// routes every sent message to the stores that should hold it, and keeps
/// track of connections so it can fail them all on shutdown. Client ids are
/// unique per broker.
pub struct Broker {
    settings: Settings,
    destinations: DestinationRegistry,
    subscriptions: SubscriptionManager,
    client_ids: Mutex<HashSet<String>>,
    connections: Mutex<HashMap<ConnectionId, Weak<dyn ConnectionEvents>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("destinations", &self.destinations)
            .field("subscriptions", &self.subscriptions.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Broker {
    /// Creates a new broker with the given settings.
    pub fn new(settings: Settings) -> Arc<Self> {
        info!(
            "Starting broker (auto-create destinations: {})",
            settings.broker.auto_create_destinations
        );
        Arc::new(Self {
            settings,
            destinations: DestinationRegistry::new(),
            subscriptions: SubscriptionManager::new(),
            client_ids: Mutex::new(HashSet::new()),
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn destinations(&self) -> &DestinationRegistry {
        &self.destinations
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Declares a named queue or topic ahead of use.
    pub fn declare(&self, destination: &Destination) -> Result<Destination> {
        self.ensure_running()?;
        self.destinations.declare(destination)
    }

    pub(crate) fn create_temporary(
        &self,
        kind: DestinationKind,
        owner: ConnectionId,
    ) -> Result<Destination> {
        self.ensure_running()?;
        Ok(self.destinations.create_temporary(kind, owner))
    }

    /// Deletes a temporary destination. Fails while it still has consumers.
    pub fn delete_temporary(&self, destination: &Destination) -> Result<()> {
        if !destination.is_temporary() {
            return Err(JmsError::InvalidDestination(format!(
                "{destination} is not a temporary destination"
            )));
        }
        let in_use = match destination.kind() {
            DestinationKind::Queue => self
                .destinations
                .queue(destination, false)
                .map(|q| q.consumer_count())
                .unwrap_or(0),
            DestinationKind::Topic => self.subscriptions.active_on(destination),
        };
        if in_use > 0 {
            return Err(JmsError::illegal_state(format!(
                "{destination} still has {in_use} active consumer(s)"
            )));
        }
        self.remove_temporary(destination);
        Ok(())
    }

    fn remove_temporary(&self, destination: &Destination) {
        if self.destinations.remove_temporary(destination) && destination.is_topic() {
            self.subscriptions.remove_topic(destination);
        }
    }

    /// Removes every temporary owned by a closing connection, consumers or not.
    pub(crate) fn drop_temporaries_of(&self, owner: ConnectionId) {
        for destination in self.destinations.owned_by(owner) {
            self.remove_temporary(&destination);
        }
    }

    /// Finds the queue or topic a message for `destination` should go to.
    pub(crate) fn resolve(&self, destination: &Destination) -> Result<Route> {
        self.ensure_running()?;
        let auto_create = self.settings.broker.auto_create_destinations;
        match destination.kind() {
            DestinationKind::Queue => self
                .destinations
                .queue(destination, auto_create)
                .map(Route::Queue),
            DestinationKind::Topic => self
                .destinations
                .topic(destination, auto_create)
                .map(|t| Route::Topic(t.destination.clone())),
        }
    }

    pub(crate) fn queue(&self, destination: &Destination) -> Result<Arc<QueueEntry>> {
        self.ensure_running()?;
        self.destinations
            .queue(destination, self.settings.broker.auto_create_destinations)
    }

    /// Hands a message to a resolved route.
    pub(crate) fn deliver(&self, route: &Route, message: Message) {
        match route {
            Route::Queue(queue) => {
                let seq = queue.store.enqueue(message);
                debug!("Enqueued message {} on {}", seq, queue.destination);
            }
            Route::Topic(topic) => {
                let copies = self.subscriptions.publish(topic, &message);
                debug!("Published to {} ({} subscription(s))", topic, copies);
            }
        }
    }

    /// Number of undelivered messages on a queue, or `None` if it is unknown.
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.destinations
            .queue(&Destination::queue(name), false)
            .ok()
            .map(|q| q.store.depth(now_millis()))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn claim_client_id(&self, client_id: &str) -> Result<()> {
        if client_id.trim().is_empty() {
            return Err(JmsError::InvalidClientId(
                "client id must not be empty".to_string(),
            ));
        }
        if !self.client_ids.lock().insert(client_id.to_string()) {
            return Err(JmsError::InvalidClientId(format!(
                "'{client_id}' is already in use"
            )));
        }
        Ok(())
    }

    pub(crate) fn release_client_id(&self, client_id: &str) {
        self.client_ids.lock().remove(client_id);
    }

    pub(crate) fn register_connection(&self, id: ConnectionId, events: Weak<dyn ConnectionEvents>) {
        self.connections.lock().insert(id, events);
    }

    pub(crate) fn deregister_connection(&self, id: ConnectionId) {
        self.connections.lock().remove(&id);
    }

    /// Token cancelled when the broker shuts down.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(JmsError::Internal("broker has shut down".to_string()));
        }
        Ok(())
    }

    /// Stops the broker.
    ///
    /// Every live connection's exception listener is told once; blocked
    /// receives return no message and later operations fail.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down broker");
        self.shutdown.cancel();

        let connections: Vec<_> = self.connections.lock().drain().collect();
        for (id, events) in connections {
            match events.upgrade() {
                Some(events) => {
                    events.on_failure(JmsError::Internal("broker has shut down".to_string()))
                }
                None => warn!("Connection {} was dropped without being closed", id),
            }
        }
    }
}
