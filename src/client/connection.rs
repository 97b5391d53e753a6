use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::engine::ConnectionEvents;
use crate::broker::{Broker, Destination};
use crate::client::context::JmsContext;
use crate::client::listener::ExceptionListener;
use crate::client::session::{AcknowledgeMode, Session, SessionInner};
use crate::message::ConnectionId;
use crate::utils::{JmsError, Result};

/// Describes the provider behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetaData {
    pub jms_version: &'static str,
    pub jms_major_version: u32,
    pub jms_minor_version: u32,
    pub provider_name: &'static str,
    pub provider_version: &'static str,
    /// JMSX properties this provider understands.
    pub jmsx_property_names: Vec<&'static str>,
}

impl ConnectionMetaData {
    fn current() -> Self {
        Self {
            jms_version: "2.0",
            jms_major_version: 2,
            jms_minor_version: 0,
            provider_name: env!("CARGO_PKG_NAME"),
            provider_version: env!("CARGO_PKG_VERSION"),
            jmsx_property_names: vec!["JMSXGroupID", "JMSXGroupSeq", "JMSXDeliveryCount"],
        }
    }
}

pub(crate) struct ConnectionInner {
    pub(crate) id: ConnectionId,
    pub(crate) broker: Arc<Broker>,
    client_id: Mutex<Option<String>>,
    /// Set on first use; the client id cannot change afterwards.
    client_id_locked: AtomicBool,
    pub(crate) started: watch::Sender<bool>,
    pub(crate) cancel: CancellationToken,
    closed: AtomicBool,
    sessions: Mutex<Vec<Arc<SessionInner>>>,
    exception_listener: Mutex<Option<Arc<dyn ExceptionListener>>>,
    failure_lock: Mutex<()>,
}

impl ConnectionInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JmsError::illegal_state("connection is closed"));
        }
        self.broker.ensure_running()
    }

    pub(crate) fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    pub(crate) fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    pub(crate) fn lock_client_id(&self) {
        self.client_id_locked.store(true, Ordering::SeqCst);
    }

    /// Only the connection that created a temporary destination may delete it.
    pub(crate) fn check_owner(&self, destination: &Destination) -> Result<()> {
        if !destination.is_temporary() {
            return Ok(());
        }
        match self.broker.destinations().owner_of(destination) {
            Some(owner) if owner == self.id => Ok(()),
            Some(_) => Err(JmsError::illegal_state(format!(
                "{destination} belongs to another connection"
            ))),
            None => Err(JmsError::InvalidDestination(format!(
                "{destination} has been deleted"
            ))),
        }
    }

    /// Only the connection that created a temporary destination may consume
    /// from it.
    pub(crate) fn check_consumable(&self, destination: &Destination) -> Result<()> {
        self.check_owner(destination)
    }

    pub(crate) fn remove_session(&self, id: u64) {
        self.sessions.lock().retain(|s| s.id != id);
    }

    fn sessions(&self) -> Vec<Arc<SessionInner>> {
        self.sessions.lock().clone()
    }

    fn in_callback(&self) -> bool {
        self.sessions().iter().any(|s| s.is_callback_task())
    }
}

impl ConnectionEvents for ConnectionInner {
    fn on_failure(&self, error: JmsError) {
        let _serial = self.failure_lock.lock();
        let listener = self.exception_listener.lock().clone();
        match listener {
            Some(listener) => listener.on_exception(error),
            None => warn!("Connection {} failed: {}", self.id, error),
        }
    }
}

/// An application's link to a [`Broker`].
///
/// A connection starts stopped: consumers can be created but nothing is
/// delivered until [`Connection::start`]. Cloning yields another handle to
/// the same connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("client_id", &self.inner.client_id())
            .field("started", &self.inner.is_started())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    pub(crate) fn open(broker: Arc<Broker>, client_id: Option<String>) -> Result<Self> {
        broker.ensure_running()?;
        if let Some(client_id) = &client_id {
            broker.claim_client_id(client_id)?;
        }
        let locked = client_id.is_some();
        let (started, _) = watch::channel(false);
        let inner = Arc::new(ConnectionInner {
            id: broker.next_id(),
            cancel: broker.shutdown_token().child_token(),
            broker,
            client_id: Mutex::new(client_id),
            client_id_locked: AtomicBool::new(locked),
            started,
            closed: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            exception_listener: Mutex::new(None),
            failure_lock: Mutex::new(()),
        });
        let weak: Weak<ConnectionInner> = Arc::downgrade(&inner);
        let events: Weak<dyn ConnectionEvents> = weak;
        inner.broker.register_connection(inner.id, events);
        info!(
            "Opened connection {} (client id: {})",
            inner.id,
            inner.client_id().as_deref().unwrap_or("<none>")
        );
        Ok(Self { inner })
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.inner.broker
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id()
    }

    /// Assigns the client id. Only allowed before the connection is first
    /// used, and the id must not be in use by another connection.
    pub fn set_client_id(&self, client_id: &str) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.client_id_locked.load(Ordering::SeqCst) {
            return Err(JmsError::illegal_state(
                "the client id can only be set before the connection is used",
            ));
        }
        let mut current = self.inner.client_id.lock();
        if current.is_some() {
            return Err(JmsError::illegal_state("the client id is already set"));
        }
        self.inner.broker.claim_client_id(client_id)?;
        *current = Some(client_id.to_string());
        self.inner.lock_client_id();
        Ok(())
    }

    pub fn metadata(&self) -> ConnectionMetaData {
        ConnectionMetaData::current()
    }

    pub fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.lock_client_id();
        *self.inner.exception_listener.lock() = listener;
        Ok(())
    }

    pub fn exception_listener(&self) -> Option<Arc<dyn ExceptionListener>> {
        self.inner.exception_listener.lock().clone()
    }

    /// Starts (or resumes) delivery to every consumer of this connection.
    pub fn start(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.lock_client_id();
        if !self.inner.started.send_replace(true) {
            info!("Started connection {}", self.inner.id);
        }
        Ok(())
    }

    /// Pauses delivery. Returns once no listener of this connection is
    /// running and no receive is taking a message.
    pub async fn stop(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.in_callback() {
            return Err(JmsError::illegal_state(
                "a connection cannot be stopped from one of its own listeners",
            ));
        }
        self.inner.lock_client_id();
        self.inner.started.send_replace(false);
        for session in self.inner.sessions() {
            drop(session.delivery_lock.lock().await);
        }
        info!("Stopped connection {}", self.inner.id);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    pub fn create_session(&self, mode: AcknowledgeMode) -> Result<Session> {
        self.inner.ensure_open()?;
        self.inner.lock_client_id();
        let session = Session::create(self.inner.clone(), mode);
        self.inner.sessions.lock().push(session.inner.clone());
        Ok(session)
    }

    /// Closes the connection and everything created from it.
    ///
    /// Waits for running listeners, closes every session, deletes the
    /// temporary destinations this connection created and frees the client
    /// id. Closing a closed connection does nothing.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.inner.in_callback() {
            return Err(JmsError::illegal_state(
                "a connection cannot be closed from one of its own listeners",
            ));
        }
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.started.send_replace(false);

        for session in self.inner.sessions() {
            if let Err(err) = session.close().await {
                warn!("Failed to close session {}: {}", session.id, err);
            }
        }
        let broker = &self.inner.broker;
        broker.drop_temporaries_of(self.inner.id);
        if let Some(client_id) = self.inner.client_id() {
            broker.release_client_id(&client_id);
        }
        broker.deregister_connection(self.inner.id);
        self.inner.cancel.cancel();
        info!("Closed connection {}", self.inner.id);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Creates connections and contexts bound to one broker.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    broker: Arc<Broker>,
    client_id: Option<String>,
}

impl ConnectionFactory {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            client_id: None,
        }
    }

    /// Gives every connection from this factory the same client id. Only one
    /// of them can be open at a time.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn create_connection(&self) -> Result<Connection> {
        Connection::open(self.broker.clone(), self.client_id.clone())
    }

    /// Opens a connection with one session, wrapped in a [`JmsContext`].
    pub fn create_context(&self, mode: AcknowledgeMode) -> Result<JmsContext> {
        JmsContext::open(self.create_connection()?, mode)
    }
}
