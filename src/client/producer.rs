use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::broker::Destination;
use crate::client::listener::CompletionListener;
use crate::client::session::SessionInner;
use crate::config::ProducerSettings;
use crate::message::{DeliveryMode, MAX_PRIORITY, Message};
use crate::utils::{JmsError, Result};

/// Per-send delivery options.
///
/// A producer starts from the `[producer]` section of the settings; every
/// field can be changed on the producer or overridden for a single send.
/// Times are in milliseconds. A time to live of zero means the message never
/// expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub time_to_live: i64,
    pub delivery_delay: i64,
    /// Leaves `JMSMessageID` unset.
    pub disable_message_id: bool,
    /// Leaves `JMSTimestamp` at zero.
    pub disable_timestamp: bool,
}

impl From<&ProducerSettings> for SendOptions {
    fn from(settings: &ProducerSettings) -> Self {
        Self {
            delivery_mode: settings.delivery_mode,
            priority: settings.priority,
            time_to_live: settings.time_to_live_ms,
            delivery_delay: settings.delivery_delay_ms,
            disable_message_id: false,
            disable_timestamp: false,
        }
    }
}

impl SendOptions {
    pub fn validate(&self) -> Result<()> {
        if self.priority > MAX_PRIORITY {
            return Err(JmsError::InvalidArgument(format!(
                "priority {} is outside 0..={MAX_PRIORITY}",
                self.priority
            )));
        }
        if self.time_to_live < 0 {
            return Err(JmsError::InvalidArgument(format!(
                "time to live must not be negative, got {}",
                self.time_to_live
            )));
        }
        if self.delivery_delay < 0 {
            return Err(JmsError::InvalidArgument(format!(
                "delivery delay must not be negative, got {}",
                self.delivery_delay
            )));
        }
        Ok(())
    }
}

pub(crate) struct ProducerInner {
    destination: Option<Destination>,
    options: Mutex<SendOptions>,
    closed: AtomicBool,
}

impl ProducerInner {
    pub(crate) fn new(destination: Option<Destination>, options: SendOptions) -> Self {
        Self {
            destination,
            options: Mutex::new(options),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Sends messages to a destination.
///
/// A producer created without a destination is unidentified: each send names
/// its destination with [`MessageProducer::send_to`].
pub struct MessageProducer {
    session: Arc<SessionInner>,
    inner: Arc<ProducerInner>,
}

impl std::fmt::Debug for MessageProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProducer")
            .field("destination", &self.inner.destination)
            .field("options", &*self.inner.options.lock())
            .finish()
    }
}

impl MessageProducer {
    pub(crate) fn new(session: Arc<SessionInner>, inner: Arc<ProducerInner>) -> Self {
        Self { session, inner }
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.inner.destination.as_ref()
    }

    /// Current options, used by every send that does not pass its own.
    pub fn options(&self) -> SendOptions {
        self.inner.options.lock().clone()
    }

    fn update(&self, change: impl FnOnce(&mut SendOptions)) -> Result<()> {
        self.ensure_open()?;
        let mut options = self.inner.options.lock();
        let mut updated = options.clone();
        change(&mut updated);
        updated.validate()?;
        *options = updated;
        Ok(())
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.inner.options.lock().delivery_mode
    }

    pub fn set_delivery_mode(&self, mode: DeliveryMode) -> Result<()> {
        self.update(|o| o.delivery_mode = mode)
    }

    pub fn priority(&self) -> u8 {
        self.inner.options.lock().priority
    }

    pub fn set_priority(&self, priority: u8) -> Result<()> {
        self.update(|o| o.priority = priority)
    }

    pub fn time_to_live(&self) -> i64 {
        self.inner.options.lock().time_to_live
    }

    pub fn set_time_to_live(&self, millis: i64) -> Result<()> {
        self.update(|o| o.time_to_live = millis)
    }

    pub fn delivery_delay(&self) -> i64 {
        self.inner.options.lock().delivery_delay
    }

    pub fn set_delivery_delay(&self, millis: i64) -> Result<()> {
        self.update(|o| o.delivery_delay = millis)
    }

    pub fn disable_message_id(&self) -> bool {
        self.inner.options.lock().disable_message_id
    }

    pub fn set_disable_message_id(&self, disable: bool) -> Result<()> {
        self.update(|o| o.disable_message_id = disable)
    }

    pub fn disable_timestamp(&self) -> bool {
        self.inner.options.lock().disable_timestamp
    }

    pub fn set_disable_timestamp(&self, disable: bool) -> Result<()> {
        self.update(|o| o.disable_timestamp = disable)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(JmsError::illegal_state("producer is closed"));
        }
        self.session.ensure_open()
    }

    fn target(&self, destination: Option<&Destination>) -> Result<Destination> {
        match (&self.inner.destination, destination) {
            (Some(_), Some(_)) => Err(JmsError::UnsupportedOperation(
                "this producer has a destination; use send".to_string(),
            )),
            (None, None) => Err(JmsError::UnsupportedOperation(
                "this producer has no destination; use send_to".to_string(),
            )),
            (Some(own), None) => Ok(own.clone()),
            (None, Some(given)) => Ok(given.clone()),
        }
    }

    /// Sends to the producer's destination.
    ///
    /// On return `message` carries the header fields the provider assigned
    /// and is read-only.
    pub fn send(&self, message: &mut Message) -> Result<()> {
        self.send_with(None, message, &self.options())
    }

    /// Sends through an unidentified producer.
    pub fn send_to(&self, destination: &Destination, message: &mut Message) -> Result<()> {
        self.send_with(Some(destination), message, &self.options())
    }

    /// Sends with explicit options instead of the producer's own.
    pub fn send_with(
        &self,
        destination: Option<&Destination>,
        message: &mut Message,
        options: &SendOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        let target = self.target(destination)?;
        self.session.send(&target, message, options)
    }

    /// Sends and reports the outcome to `listener` from another task.
    ///
    /// The message is handed to the destination before this returns, so
    /// ordering with other sends of the session is kept. Completion callbacks
    /// never overlap with the session's message listeners.
    pub fn send_async(
        &self,
        destination: Option<&Destination>,
        message: Message,
        listener: Arc<dyn CompletionListener>,
    ) -> Result<()> {
        self.send_async_with(destination, message, &self.options(), listener)
            .map(|_| ())
    }

    /// Like [`MessageProducer::send_async`] with explicit options. Returns a
    /// copy of the message as sent.
    pub(crate) fn send_async_with(
        &self,
        destination: Option<&Destination>,
        mut message: Message,
        options: &SendOptions,
        listener: Arc<dyn CompletionListener>,
    ) -> Result<Message> {
        self.ensure_open()?;
        let target = self.target(destination)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            JmsError::illegal_state("asynchronous sends require a running tokio runtime")
        })?;

        let outcome = self.session.send(&target, &mut message, options);
        let receipt = message.clone();
        let session = self.session.clone();
        let handle = runtime.spawn(async move {
            let _delivery = session.delivery_lock.lock().await;
            let finished = match outcome {
                Ok(()) => session.run_callback(listener.on_completion(message)).await,
                Err(err) => session.run_callback(listener.on_exception(message, err)).await,
            };
            if finished.is_err() {
                warn!("Completion listener panicked in session {}", session.id);
            }
        });
        self.session.track_completion(handle);
        Ok(receipt)
    }

    /// Closes the producer. Later sends fail; closing twice is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
