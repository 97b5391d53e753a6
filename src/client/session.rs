use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::engine::Route;
use crate::broker::{Destination, DestinationKind, MessageStore, SubscriptionRequest};
use crate::client::browser::QueueBrowser;
use crate::client::connection::ConnectionInner;
use crate::client::consumer::{ConsumerInner, ConsumerSource, MessageConsumer};
use crate::client::dispatcher;
use crate::client::listener::MessageListener;
use crate::client::producer::{MessageProducer, ProducerInner, SendOptions};
use crate::message::{Acknowledger, BodyKind, DeliveryHandle, Message};
use crate::selector::Selector;
use crate::utils::{JmsError, Result, now_millis};

/// When consumed messages count as received for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgeMode {
    /// Each message is acknowledged once `receive` returns it or its
    /// listener returns.
    #[default]
    Auto,
    /// The application calls [`Message::acknowledge`].
    Client,
    /// Like `Auto`; duplicates are tolerated.
    DupsOk,
    /// Sends and receives take effect on `commit`.
    Transacted,
}

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug)]
struct PendingDelivery {
    sequence: u64,
    store: Arc<MessageStore>,
    store_seq: u64,
}

#[derive(Default)]
struct SessionState {
    next_sequence: u64,
    pending: Vec<PendingDelivery>,
    /// Sends buffered by a transacted session until commit.
    outbound: Vec<(Destination, Message)>,
    consumers: Vec<Arc<ConsumerInner>>,
    producers: Vec<Arc<ProducerInner>>,
    completions: Vec<JoinHandle<()>>,
}

pub(crate) struct SessionInner {
    pub(crate) id: u64,
    mode: AcknowledgeMode,
    pub(crate) connection: Arc<ConnectionInner>,
    pub(crate) cancel: CancellationToken,
    closed: AtomicBool,
    /// Held while a message is taken from a store and, for listeners, while
    /// the callback runs. Acquiring it waits out any delivery in progress.
    pub(crate) delivery_lock: tokio::sync::Mutex<()>,
    /// Task currently running one of this session's callbacks.
    callback_task: Mutex<Option<task::Id>>,
    state: Mutex<SessionState>,
    pub(crate) listener_changed: Notify,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    pub(crate) fn new(connection: Arc<ConnectionInner>, mode: AcknowledgeMode) -> Arc<Self> {
        Arc::new(Self {
            id: connection.broker.next_id(),
            mode,
            cancel: connection.cancel.child_token(),
            connection,
            closed: AtomicBool::new(false),
            delivery_lock: tokio::sync::Mutex::new(()),
            callback_task: Mutex::new(None),
            state: Mutex::new(SessionState::default()),
            listener_changed: Notify::new(),
            dispatcher: Mutex::new(None),
        })
    }

    pub(crate) fn is_transacted(&self) -> bool {
        self.mode == AcknowledgeMode::Transacted
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(JmsError::illegal_state("session is closed"));
        }
        self.connection.ensure_open()
    }

    /// Whether the caller is running inside one of this session's callbacks.
    pub(crate) fn is_callback_task(&self) -> bool {
        match task::try_id() {
            Some(id) => *self.callback_task.lock() == Some(id),
            None => false,
        }
    }

    /// Runs an application callback, marking the current task as the
    /// session's callback task. A panic is caught and returned as `Err`.
    pub(crate) async fn run_callback<F>(&self, callback: F) -> std::thread::Result<F::Output>
    where
        F: Future,
    {
        *self.callback_task.lock() = task::try_id();
        let outcome = AssertUnwindSafe(callback).catch_unwind().await;
        *self.callback_task.lock() = None;
        outcome
    }

    // ---- delivery -----------------------------------------------------

    /// Takes the next message for `consumer` and records it as pending.
    pub(crate) fn take_next(self: &Arc<Self>, consumer: &ConsumerInner) -> Option<Message> {
        let store = consumer.store();
        let (store_seq, mut message) = consumer.poll(now_millis())?;

        let sequence = {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push(PendingDelivery {
                sequence,
                store: store.clone(),
                store_seq,
            });
            sequence
        };

        let weak: std::sync::Weak<SessionInner> = Arc::downgrade(self);
        let acknowledger: std::sync::Weak<dyn Acknowledger> = weak;
        message.delivery = Some(DeliveryHandle {
            acknowledger,
            sequence,
        });
        message.make_read_only();
        debug!(
            "Session {} delivered {} from {} (delivery {})",
            self.id,
            message.message_id().unwrap_or("<no id>"),
            store.name(),
            sequence
        );
        Some(message)
    }

    /// Acknowledges a delivery right away in the automatic modes.
    pub(crate) fn complete_delivery(&self, message: &Message) {
        if !matches!(self.mode, AcknowledgeMode::Auto | AcknowledgeMode::DupsOk) {
            return;
        }
        let Some(sequence) = message.delivery.as_ref().map(|d| d.sequence) else {
            return;
        };
        let record = {
            let mut state = self.state.lock();
            let index = state.pending.iter().position(|r| r.sequence == sequence);
            index.map(|i| state.pending.remove(i))
        };
        if let Some(record) = record {
            record.store.acknowledge(record.store_seq);
        }
    }

    /// Hands a message to a listener and completes the delivery afterwards.
    pub(crate) async fn deliver_to_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        message: Message,
    ) {
        let receipt = message.clone();
        if self.run_callback(listener.on_message(message)).await.is_err() {
            warn!(
                "Message listener panicked on {} in session {}",
                receipt.message_id().unwrap_or("<no id>"),
                self.id
            );
        }
        self.complete_delivery(&receipt);
    }

    fn take_pending(&self, through: u64) -> Vec<PendingDelivery> {
        let mut state = self.state.lock();
        let (done, keep) = mem::take(&mut state.pending)
            .into_iter()
            .partition(|r| r.sequence <= through);
        state.pending = keep;
        done
    }

    fn requeue_pending(&self) -> usize {
        let records = self.take_pending(u64::MAX);
        for record in &records {
            record.store.requeue(record.store_seq);
        }
        records.len()
    }

    /// Acknowledges every message consumed so far. No-op outside client mode.
    pub(crate) fn acknowledge_all(&self) -> Result<()> {
        self.acknowledge_through(u64::MAX)
    }

    // ---- sending ------------------------------------------------------

    pub(crate) fn send(
        &self,
        destination: &Destination,
        message: &mut Message,
        options: &SendOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        options.validate()?;
        let route = self.connection.broker.resolve(destination)?;

        stamp(message, destination, options, self.connection.id);
        let mut copy = message.clone();
        copy.delivery = None;

        if self.is_transacted() {
            self.state.lock().outbound.push((destination.clone(), copy));
            debug!("Session {} buffered a send to {}", self.id, destination);
        } else {
            self.connection.broker.deliver(&route, copy);
        }
        Ok(())
    }

    pub(crate) fn track_completion(&self, handle: JoinHandle<()>) {
        let mut state = self.state.lock();
        state.completions.retain(|h| !h.is_finished());
        state.completions.push(handle);
    }

    // ---- transactions -------------------------------------------------

    pub(crate) fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_transacted() {
            return Err(JmsError::illegal_state("commit requires a transacted session"));
        }
        let outbound = mem::take(&mut self.state.lock().outbound);
        let broker = &self.connection.broker;

        let routes: Result<Vec<Route>> = outbound.iter().map(|(d, _)| broker.resolve(d)).collect();
        let routes = match routes {
            Ok(routes) => routes,
            Err(err) => {
                let requeued = self.requeue_pending();
                warn!(
                    "Session {} rolled back on commit ({} message(s) requeued): {}",
                    self.id, requeued, err
                );
                return Err(JmsError::TransactionRolledBack(err.to_string()));
            }
        };

        let sent = outbound.len();
        for (route, (_, message)) in routes.iter().zip(outbound) {
            broker.deliver(route, message);
        }
        let consumed = self.take_pending(u64::MAX);
        for record in &consumed {
            record.store.acknowledge(record.store_seq);
        }
        debug!(
            "Session {} committed {} send(s) and {} receive(s)",
            self.id,
            sent,
            consumed.len()
        );
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.is_transacted() {
            return Err(JmsError::illegal_state("rollback requires a transacted session"));
        }
        let dropped = mem::take(&mut self.state.lock().outbound).len();
        let requeued = self.requeue_pending();
        debug!(
            "Session {} rolled back {} send(s) and {} receive(s)",
            self.id, dropped, requeued
        );
        Ok(())
    }

    pub(crate) fn recover(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_transacted() {
            return Err(JmsError::illegal_state("recover is not allowed on a transacted session"));
        }
        let requeued = self.requeue_pending();
        debug!("Session {} recovered {} message(s)", self.id, requeued);
        Ok(())
    }

    // ---- consumers ----------------------------------------------------

    fn add_consumer(&self, consumer: Arc<ConsumerInner>) {
        self.state.lock().consumers.push(consumer);
    }

    pub(crate) fn remove_consumer(&self, consumer: &ConsumerInner) {
        self.state.lock().consumers.retain(|c| c.id != consumer.id);
        consumer.shutdown(&self.connection.broker);
        self.listener_changed.notify_one();
    }

    /// Open consumers that currently have a listener.
    pub(crate) fn listening_consumers(&self) -> Vec<Arc<ConsumerInner>> {
        self.state
            .lock()
            .consumers
            .iter()
            .filter(|c| !c.is_closed() && c.listener().is_some())
            .cloned()
            .collect()
    }

    /// Starts the session's dispatcher task if it is not running yet.
    pub(crate) fn ensure_dispatcher(self: &Arc<Self>) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            JmsError::illegal_state("message listeners require a running tokio runtime")
        })?;
        *dispatcher = Some(runtime.spawn(dispatcher::run(self.clone())));
        Ok(())
    }

    pub(crate) fn add_producer(&self, producer: Arc<ProducerInner>) {
        let mut state = self.state.lock();
        state.producers.retain(|p| !p.is_closed());
        state.producers.push(producer);
    }

    // ---- close --------------------------------------------------------

    pub(crate) async fn close(self: &Arc<Self>) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.is_callback_task() {
            return Err(JmsError::illegal_state(
                "a session cannot be closed from its own listener",
            ));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();

        // wait for the delivery in progress, if any
        drop(self.delivery_lock.lock().await);

        let completions = mem::take(&mut self.state.lock().completions);
        join_all(completions).await;
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        let (consumers, producers, discarded) = {
            let mut state = self.state.lock();
            let discarded = mem::take(&mut state.outbound).len();
            (
                mem::take(&mut state.consumers),
                mem::take(&mut state.producers),
                discarded,
            )
        };
        let requeued = self.requeue_pending();
        for consumer in consumers {
            consumer.shutdown(&self.connection.broker);
        }
        for producer in producers {
            producer.close();
        }
        self.connection.remove_session(self.id);
        info!(
            "Closed session {} ({} message(s) requeued, {} unsent)",
            self.id, requeued, discarded
        );
        Ok(())
    }
}

impl Acknowledger for SessionInner {
    fn acknowledge_through(&self, sequence: u64) -> Result<()> {
        if self.is_closed() {
            return Err(JmsError::illegal_state("session is closed"));
        }
        if self.mode != AcknowledgeMode::Client {
            return Ok(());
        }
        let records = self.take_pending(sequence);
        for record in &records {
            record.store.acknowledge(record.store_seq);
        }
        debug!("Session {} acknowledged {} message(s)", self.id, records.len());
        Ok(())
    }
}

/// Fills in the provider-assigned header fields of a message being sent and
/// puts it in read-only mode.
fn stamp(message: &mut Message, destination: &Destination, options: &SendOptions, origin: u64) {
    let now = now_millis();
    let header = message.header_mut();
    header.destination = Some(destination.clone());
    header.delivery_mode = options.delivery_mode;
    header.priority = options.priority;
    header.redelivered = false;
    header.timestamp = if options.disable_timestamp { 0 } else { now };
    header.message_id = if options.disable_message_id {
        None
    } else {
        Some(format!("ID:{}", uuid::Uuid::new_v4()))
    };
    header.expiration = if options.time_to_live > 0 {
        now.saturating_add(options.time_to_live)
    } else {
        0
    };
    header.delivery_time = now.saturating_add(options.delivery_delay);
    message.origin = Some(origin);
    message.make_read_only();
}

/// A single-threaded context for producing and consuming messages.
///
/// A session is used by one task at a time; only [`Session::close`] may be
/// called concurrently with other calls. Cloning yields another handle to the
/// same session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) fn create(connection: Arc<ConnectionInner>, mode: AcknowledgeMode) -> Self {
        let inner = SessionInner::new(connection, mode);
        info!(
            "Opened session {} ({:?}) on connection {}",
            inner.id, mode, inner.connection.id
        );
        Self { inner }
    }

    pub fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.inner.mode
    }

    pub fn is_transacted(&self) -> bool {
        self.inner.is_transacted()
    }

    // ---- destinations -------------------------------------------------

    /// Declares a named queue.
    pub fn create_queue(&self, name: &str) -> Result<Destination> {
        self.inner.ensure_open()?;
        self.inner.connection.broker.declare(&Destination::queue(name))
    }

    /// Declares a named topic.
    pub fn create_topic(&self, name: &str) -> Result<Destination> {
        self.inner.ensure_open()?;
        self.inner.connection.broker.declare(&Destination::topic(name))
    }

    /// Creates a queue that lives as long as this session's connection.
    pub fn create_temporary_queue(&self) -> Result<Destination> {
        self.create_temporary(DestinationKind::Queue)
    }

    pub fn create_temporary_topic(&self) -> Result<Destination> {
        self.create_temporary(DestinationKind::Topic)
    }

    fn create_temporary(&self, kind: DestinationKind) -> Result<Destination> {
        self.inner.ensure_open()?;
        let connection = &self.inner.connection;
        connection.broker.create_temporary(kind, connection.id)
    }

    /// Deletes a temporary destination created by this session's connection.
    pub fn delete_temporary(&self, destination: &Destination) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.connection.check_owner(destination)?;
        self.inner.connection.broker.delete_temporary(destination)
    }

    // ---- messages -----------------------------------------------------

    pub fn create_message(&self) -> Message {
        Message::with_kind(BodyKind::Message)
    }

    pub fn create_text_message(&self, text: impl Into<String>) -> Message {
        Message::text(text)
    }

    pub fn create_bytes_message(&self) -> Message {
        Message::bytes()
    }

    pub fn create_map_message(&self) -> Message {
        Message::map()
    }

    pub fn create_stream_message(&self) -> Message {
        Message::stream()
    }

    pub fn create_object_message<T: Serialize>(&self, value: &T) -> Result<Message> {
        Message::object(value)
    }

    // ---- producers and consumers --------------------------------------

    /// Creates a producer. Without a destination, every send names one.
    pub fn create_producer(&self, destination: Option<&Destination>) -> Result<MessageProducer> {
        self.inner.ensure_open()?;
        let defaults = SendOptions::from(&self.inner.connection.broker.settings().producer);
        let producer = Arc::new(ProducerInner::new(destination.cloned(), defaults));
        self.inner.add_producer(producer.clone());
        Ok(MessageProducer::new(self.inner.clone(), producer))
    }

    pub fn create_consumer(&self, destination: &Destination) -> Result<MessageConsumer> {
        self.create_consumer_with(destination, None, false)
    }

    /// Creates a consumer with a selector and, for topics, the noLocal flag.
    /// `no_local` is ignored for queues.
    pub fn create_consumer_with(
        &self,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        self.inner.ensure_open()?;
        let selector = Selector::optional(selector)?;
        let connection = &self.inner.connection;
        connection.check_consumable(destination)?;

        let source = match destination.kind() {
            DestinationKind::Queue => {
                let queue = connection.broker.queue(destination)?;
                queue.attach();
                ConsumerSource::Queue(queue)
            }
            DestinationKind::Topic => {
                connection.broker.resolve(destination)?;
                let request = self.subscription_request(destination, selector.clone(), no_local);
                ConsumerSource::Topic(
                    connection.broker.subscriptions().create_non_durable(request),
                )
            }
        };
        Ok(self.open_consumer(destination, source, selector))
    }

    /// Creates a consumer on an unshared durable subscription. The
    /// connection must have a client id.
    pub fn create_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        self.open_named(topic, name, selector, no_local, NamedKind::Durable)
    }

    /// Creates a consumer on a shared non-durable subscription.
    pub fn create_shared_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<MessageConsumer> {
        self.open_named(topic, name, selector, false, NamedKind::Shared)
    }

    /// Creates a consumer on a shared durable subscription.
    pub fn create_shared_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<MessageConsumer> {
        self.open_named(topic, name, selector, false, NamedKind::SharedDurable)
    }

    fn open_named(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
        kind: NamedKind,
    ) -> Result<MessageConsumer> {
        self.inner.ensure_open()?;
        if name.trim().is_empty() {
            return Err(JmsError::InvalidArgument(
                "subscription name must not be empty".to_string(),
            ));
        }
        if !topic.is_topic() {
            return Err(JmsError::InvalidDestination(format!(
                "{topic} is not a topic"
            )));
        }
        if kind != NamedKind::Shared && topic.is_temporary() {
            return Err(JmsError::InvalidDestination(format!(
                "durable subscriptions cannot use {topic}"
            )));
        }
        let selector = Selector::optional(selector)?;
        let connection = &self.inner.connection;
        connection.check_consumable(topic)?;
        connection.broker.resolve(topic)?;

        connection.lock_client_id();
        let client_id = connection.client_id();
        let request = self.subscription_request(topic, selector.clone(), no_local);
        let subscriptions = connection.broker.subscriptions();
        let subscription = match kind {
            NamedKind::Durable => subscriptions.create_durable(name, client_id.as_deref(), request),
            NamedKind::SharedDurable => {
                subscriptions.create_shared_durable(name, client_id.as_deref(), request)
            }
            NamedKind::Shared => {
                subscriptions.create_shared_non_durable(name, client_id.as_deref(), request)
            }
        }?;
        Ok(self.open_consumer(topic, ConsumerSource::Topic(subscription), selector))
    }

    fn subscription_request(
        &self,
        topic: &Destination,
        selector: Option<Selector>,
        no_local: bool,
    ) -> SubscriptionRequest {
        SubscriptionRequest {
            topic: topic.clone(),
            selector,
            no_local,
            connection: self.inner.connection.id,
        }
    }

    fn open_consumer(
        &self,
        destination: &Destination,
        source: ConsumerSource,
        selector: Option<Selector>,
    ) -> MessageConsumer {
        let consumer = Arc::new(ConsumerInner::new(
            self.inner.connection.broker.next_id(),
            destination.clone(),
            source,
            selector,
            self.inner.cancel.child_token(),
        ));
        self.inner.add_consumer(consumer.clone());
        debug!(
            "Session {} opened consumer {} on {}",
            self.inner.id, consumer.id, destination
        );
        MessageConsumer::new(self.inner.clone(), consumer)
    }

    /// Creates a browser over the messages waiting on a queue.
    pub fn create_browser(&self, queue: &Destination, selector: Option<&str>) -> Result<QueueBrowser> {
        self.inner.ensure_open()?;
        if !queue.is_queue() {
            return Err(JmsError::InvalidDestination(format!("{queue} is not a queue")));
        }
        let selector = Selector::optional(selector)?;
        let entry = self.inner.connection.broker.queue(queue)?;
        Ok(QueueBrowser::new(self.inner.clone(), entry, selector))
    }

    /// Deletes a durable subscription created with this connection's client id.
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        self.inner.ensure_open()?;
        let connection = &self.inner.connection;
        connection.lock_client_id();
        let client_id = connection.client_id();
        connection
            .broker
            .subscriptions()
            .unsubscribe(name, client_id.as_deref())
    }

    // ---- transactions -------------------------------------------------

    /// Makes every buffered send visible and every receive permanent.
    pub fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    /// Discards buffered sends and returns received messages for redelivery.
    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    /// Redelivers every unacknowledged message, oldest first.
    pub fn recover(&self) -> Result<()> {
        self.inner.recover()
    }

    /// Closes the session, waiting for any delivery in progress.
    ///
    /// An open transaction is rolled back and unacknowledged messages become
    /// available for redelivery. Closing a closed session does nothing.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedKind {
    Durable,
    Shared,
    SharedDurable,
}
