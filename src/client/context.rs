//! The simplified API: one connection and one session behind a single handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::broker::Destination;
use crate::client::browser::QueueBrowser;
use crate::client::connection::{Connection, ConnectionMetaData};
use crate::client::consumer::MessageConsumer;
use crate::client::listener::{CompletionListener, ExceptionListener};
use crate::client::producer::{MessageProducer, SendOptions};
use crate::client::session::{AcknowledgeMode, Session};
use crate::message::property::validate_client_property_name;
use crate::message::{DeliveryMode, Message, PropertyValue};
use crate::utils::{JmsError, Result};

/// A connection and a session used as one unit.
///
/// The connection starts on its own when the first consumer is created,
/// unless auto-start is turned off. Contexts made with
/// [`JmsContext::create_context`] share the connection, which closes with the
/// last of them.
pub struct JmsContext {
    connection: Connection,
    session: Session,
    auto_start: AtomicBool,
    open_contexts: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl std::fmt::Debug for JmsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JmsContext")
            .field("connection", &self.connection)
            .field("session", &self.session)
            .field("auto_start", &self.auto_start())
            .finish()
    }
}

impl JmsContext {
    pub(crate) fn open(connection: Connection, mode: AcknowledgeMode) -> Result<Self> {
        let session = connection.create_session(mode)?;
        Ok(Self {
            connection,
            session,
            auto_start: AtomicBool::new(true),
            open_contexts: Arc::new(AtomicUsize::new(1)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JmsError::illegal_state("context is closed"));
        }
        Ok(())
    }

    /// A new context with its own session on the same connection.
    pub fn create_context(&self, mode: AcknowledgeMode) -> Result<JmsContext> {
        self.ensure_open()?;
        let session = self.connection.create_session(mode)?;
        self.open_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            connection: self.connection.clone(),
            session,
            auto_start: AtomicBool::new(self.auto_start()),
            open_contexts: self.open_contexts.clone(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_mode(&self) -> AcknowledgeMode {
        self.session.acknowledge_mode()
    }

    pub fn transacted(&self) -> bool {
        self.session.is_transacted()
    }

    pub fn client_id(&self) -> Option<String> {
        self.connection.client_id()
    }

    pub fn set_client_id(&self, client_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.connection.set_client_id(client_id)
    }

    pub fn metadata(&self) -> ConnectionMetaData {
        self.connection.metadata()
    }

    pub fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) -> Result<()> {
        self.ensure_open()?;
        self.connection.set_exception_listener(listener)
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start.load(Ordering::SeqCst)
    }

    pub fn set_auto_start(&self, auto_start: bool) {
        self.auto_start.store(auto_start, Ordering::SeqCst);
    }

    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.start()
    }

    pub async fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.connection.stop().await
    }

    // ---- destinations and messages -------------------------------------

    pub fn create_queue(&self, name: &str) -> Result<Destination> {
        self.session.create_queue(name)
    }

    pub fn create_topic(&self, name: &str) -> Result<Destination> {
        self.session.create_topic(name)
    }

    pub fn create_temporary_queue(&self) -> Result<Destination> {
        self.session.create_temporary_queue()
    }

    pub fn create_temporary_topic(&self) -> Result<Destination> {
        self.session.create_temporary_topic()
    }

    pub fn create_message(&self) -> Message {
        self.session.create_message()
    }

    pub fn create_text_message(&self, text: impl Into<String>) -> Message {
        self.session.create_text_message(text)
    }

    pub fn create_bytes_message(&self) -> Message {
        self.session.create_bytes_message()
    }

    pub fn create_map_message(&self) -> Message {
        self.session.create_map_message()
    }

    pub fn create_stream_message(&self) -> Message {
        self.session.create_stream_message()
    }

    pub fn create_object_message<T: Serialize>(&self, value: &T) -> Result<Message> {
        self.session.create_object_message(value)
    }

    // ---- producing and consuming ---------------------------------------

    pub fn create_producer(&self) -> Result<JmsProducer> {
        self.ensure_open()?;
        let producer = self.session.create_producer(None)?;
        let options = producer.options();
        Ok(JmsProducer {
            producer,
            options,
            properties: Vec::new(),
            correlation_id: None,
            reply_to: None,
            jms_type: None,
            async_listener: None,
        })
    }

    fn started(&self, consumer: MessageConsumer) -> Result<MessageConsumer> {
        if self.auto_start() && !self.connection.is_started() {
            debug!("Auto-starting connection for new consumer");
            self.connection.start()?;
        }
        Ok(consumer)
    }

    pub fn create_consumer(&self, destination: &Destination) -> Result<MessageConsumer> {
        self.ensure_open()?;
        self.started(self.session.create_consumer(destination)?)
    }

    pub fn create_consumer_with(
        &self,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        self.ensure_open()?;
        self.started(self.session.create_consumer_with(destination, selector, no_local)?)
    }

    pub fn create_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        self.ensure_open()?;
        self.started(self.session.create_durable_consumer(topic, name, selector, no_local)?)
    }

    pub fn create_shared_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<MessageConsumer> {
        self.ensure_open()?;
        self.started(self.session.create_shared_consumer(topic, name, selector)?)
    }

    pub fn create_shared_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<MessageConsumer> {
        self.ensure_open()?;
        self.started(self.session.create_shared_durable_consumer(topic, name, selector)?)
    }

    pub fn create_browser(&self, queue: &Destination, selector: Option<&str>) -> Result<QueueBrowser> {
        self.ensure_open()?;
        self.session.create_browser(queue, selector)
    }

    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.session.unsubscribe(name)
    }

    // ---- session control -----------------------------------------------

    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.session.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.session.rollback()
    }

    pub fn recover(&self) -> Result<()> {
        self.ensure_open()?;
        self.session.recover()
    }

    /// Acknowledges every message consumed by this context so far. Only
    /// meaningful in client-acknowledge mode.
    pub fn acknowledge(&self) -> Result<()> {
        self.ensure_open()?;
        self.session.inner.acknowledge_all()
    }

    /// Closes the session, and the connection if no other context uses it.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.session.close().await {
            self.closed.store(false, Ordering::SeqCst);
            return Err(err);
        }
        if self.open_contexts.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.connection.close().await?;
        }
        Ok(())
    }
}

/// Fluent producer of a [`JmsContext`].
///
/// Options, header values and properties set on the producer apply to every
/// later send. Each send names its destination.
pub struct JmsProducer {
    producer: MessageProducer,
    options: SendOptions,
    properties: Vec<(String, PropertyValue)>,
    correlation_id: Option<String>,
    reply_to: Option<Destination>,
    jms_type: Option<String>,
    async_listener: Option<Arc<dyn CompletionListener>>,
}

impl std::fmt::Debug for JmsProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JmsProducer")
            .field("options", &self.options)
            .field("properties", &self.properties)
            .field("async", &self.async_listener.is_some())
            .finish()
    }
}

impl JmsProducer {
    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) -> &mut Self {
        self.options.delivery_mode = mode;
        self
    }

    pub fn set_priority(&mut self, priority: u8) -> Result<&mut Self> {
        let mut options = self.options.clone();
        options.priority = priority;
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn set_time_to_live(&mut self, millis: i64) -> Result<&mut Self> {
        let mut options = self.options.clone();
        options.time_to_live = millis;
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn set_delivery_delay(&mut self, millis: i64) -> Result<&mut Self> {
        let mut options = self.options.clone();
        options.delivery_delay = millis;
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn set_disable_message_id(&mut self, disable: bool) -> &mut Self {
        self.options.disable_message_id = disable;
        self
    }

    pub fn set_disable_timestamp(&mut self, disable: bool) -> &mut Self {
        self.options.disable_timestamp = disable;
        self
    }

    pub fn options(&self) -> &SendOptions {
        &self.options
    }

    /// Sets a property added to every message sent afterwards.
    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<&mut Self> {
        validate_client_property_name(name)?;
        let value = value.into();
        if !value.is_property_type() {
            return Err(JmsError::format(format!(
                "{} is not a valid property type",
                value.type_name()
            )));
        }
        self.properties.retain(|(n, _)| n != name);
        self.properties.push((name.to_string(), value));
        Ok(self)
    }

    pub fn clear_properties(&mut self) -> &mut Self {
        self.properties.clear();
        self
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(n, _)| n.as_str())
    }

    pub fn set_correlation_id(&mut self, id: Option<String>) -> &mut Self {
        self.correlation_id = id;
        self
    }

    pub fn set_reply_to(&mut self, destination: Option<Destination>) -> &mut Self {
        self.reply_to = destination;
        self
    }

    pub fn set_jms_type(&mut self, jms_type: Option<String>) -> &mut Self {
        self.jms_type = jms_type;
        self
    }

    /// Makes later sends asynchronous, reporting to `listener`. `None`
    /// returns to synchronous sends.
    pub fn set_async(&mut self, listener: Option<Arc<dyn CompletionListener>>) -> &mut Self {
        self.async_listener = listener;
        self
    }

    /// Sends `message` after applying this producer's properties and header
    /// values. Returns the message as sent.
    pub fn send(&self, destination: &Destination, mut message: Message) -> Result<Message> {
        for (name, value) in &self.properties {
            message.set_property(name, value.clone())?;
        }
        if self.correlation_id.is_some() {
            message.set_correlation_id(self.correlation_id.clone());
        }
        if self.reply_to.is_some() {
            message.set_reply_to(self.reply_to.clone());
        }
        if self.jms_type.is_some() {
            message.set_jms_type(self.jms_type.clone());
        }

        match &self.async_listener {
            Some(listener) => self.producer.send_async_with(
                Some(destination),
                message,
                &self.options,
                listener.clone(),
            ),
            None => {
                self.producer
                    .send_with(Some(destination), &mut message, &self.options)?;
                Ok(message)
            }
        }
    }

    pub fn send_text(&self, destination: &Destination, text: impl Into<String>) -> Result<Message> {
        self.send(destination, Message::text(text))
    }

    pub fn send_bytes(&self, destination: &Destination, bytes: &[u8]) -> Result<Message> {
        let mut message = Message::bytes();
        message.as_bytes_mut()?.write_bytes(bytes)?;
        self.send(destination, message)
    }

    /// Sends a map message with one entry per pair.
    pub fn send_map<I, K, V>(&self, destination: &Destination, entries: I) -> Result<Message>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<crate::message::Value>,
    {
        let mut message = Message::map();
        let map = message.as_map_mut()?;
        for (name, value) in entries {
            map.set(name.as_ref(), value)?;
        }
        self.send(destination, message)
    }

    pub fn send_object<T: Serialize>(&self, destination: &Destination, value: &T) -> Result<Message> {
        self.send(destination, Message::object(value)?)
    }
}
