use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::destination::QueueEntry;
use crate::broker::{Broker, Destination, MessageStore, Subscription};
use crate::client::listener::MessageListener;
use crate::client::session::SessionInner;
use crate::message::Message;
use crate::selector::Selector;
use crate::utils::{JmsError, Result, now_millis};

/// The store a consumer reads from.
pub(crate) enum ConsumerSource {
    Queue(Arc<QueueEntry>),
    Topic(Arc<Subscription>),
}

pub(crate) struct ConsumerInner {
    pub(crate) id: u64,
    destination: Destination,
    source: ConsumerSource,
    selector: Option<Selector>,
    listener: Mutex<Option<Arc<dyn MessageListener>>>,
    pub(crate) cancel: CancellationToken,
    closed: AtomicBool,
}

impl ConsumerInner {
    pub(crate) fn new(
        id: u64,
        destination: Destination,
        source: ConsumerSource,
        selector: Option<Selector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            destination,
            source,
            selector,
            listener: Mutex::new(None),
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn store(&self) -> &Arc<MessageStore> {
        match &self.source {
            ConsumerSource::Queue(queue) => &queue.store,
            ConsumerSource::Topic(sub) => sub.store(),
        }
    }

    /// Takes the next acceptable message. Topic messages were already
    /// filtered when they were copied into the subscription.
    pub(crate) fn poll(&self, now_ms: i64) -> Option<(u64, Message)> {
        match &self.source {
            ConsumerSource::Queue(queue) => queue.store.poll(self.selector.as_ref(), now_ms),
            ConsumerSource::Topic(sub) => sub.store().poll(None, now_ms),
        }
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.listener.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Detaches the consumer from its queue or subscription. Runs once.
    pub(crate) fn shutdown(&self, broker: &Broker) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        match &self.source {
            ConsumerSource::Queue(queue) => queue.detach(),
            ConsumerSource::Topic(sub) => broker.subscriptions().release(sub),
        }
        debug!("Closed consumer {} on {}", self.id, self.destination);
    }
}

#[derive(Clone, Copy)]
enum Wait {
    Forever,
    Until(Instant),
    NoWait,
}

/// Receives messages from a queue or a topic subscription.
///
/// A consumer either receives synchronously or has a message listener, never
/// both. Nothing is delivered while the connection is stopped.
pub struct MessageConsumer {
    session: Arc<SessionInner>,
    inner: Arc<ConsumerInner>,
}

impl std::fmt::Debug for MessageConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageConsumer")
            .field("id", &self.inner.id)
            .field("destination", &self.inner.destination)
            .field("selector", &self.inner.selector)
            .finish()
    }
}

impl MessageConsumer {
    pub(crate) fn new(session: Arc<SessionInner>, inner: Arc<ConsumerInner>) -> Self {
        Self { session, inner }
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    pub fn message_selector(&self) -> Option<&str> {
        self.inner.selector.as_ref().map(Selector::source)
    }

    /// Waits for the next message. Returns `None` once the consumer, its
    /// session or its connection is closed.
    pub async fn receive(&self) -> Result<Option<Message>> {
        self.receive_with(Wait::Forever).await
    }

    /// Waits up to `timeout` for the next message.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        let wait = Instant::now()
            .checked_add(timeout)
            .map_or(Wait::Forever, Wait::Until);
        self.receive_with(wait).await
    }

    /// Returns a message only if one can be delivered right away.
    pub async fn receive_no_wait(&self) -> Result<Option<Message>> {
        self.receive_with(Wait::NoWait).await
    }

    fn check_receive(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(JmsError::illegal_state("consumer is closed"));
        }
        self.session.ensure_open()?;
        if self.inner.listener.lock().is_some() {
            return Err(JmsError::illegal_state(
                "cannot receive synchronously while a message listener is set",
            ));
        }
        if self.session.is_callback_task() {
            return Err(JmsError::illegal_state(
                "cannot receive from inside a callback of the same session",
            ));
        }
        Ok(())
    }

    async fn receive_with(&self, wait: Wait) -> Result<Option<Message>> {
        self.check_receive()?;
        let session = &self.session;
        let mut started = session.connection.started.subscribe();
        let store = self.inner.store().clone();

        loop {
            if self.inner.is_closed() {
                return Ok(None);
            }
            // registered before polling so an enqueue in between is not missed
            let mut wakeup = Box::pin(store.notified());
            wakeup.as_mut().enable();

            let running = *started.borrow_and_update();
            if running {
                let _delivery = session.delivery_lock.lock().await;
                if self.inner.is_closed() {
                    return Ok(None);
                }
                // the connection may have been stopped while this waited
                if session.connection.is_started() {
                    if let Some(message) = session.take_next(&self.inner) {
                        session.complete_delivery(&message);
                        return Ok(Some(message));
                    }
                }
            }

            let now = now_millis();
            let until_due = store
                .next_delivery_time(now)
                .map(|due| Duration::from_millis(due.saturating_sub(now).max(0) as u64));
            let nap = match wait {
                Wait::NoWait => return Ok(None),
                Wait::Forever => until_due,
                Wait::Until(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(None);
                    }
                    Some(until_due.map_or(left, |due| due.min(left)))
                }
            };

            tokio::select! {
                _ = wakeup.as_mut() => {}
                _ = self.inner.cancel.cancelled() => return Ok(None),
                _ = started.changed() => {}
                _ = nap_for(nap) => {}
            }
        }
    }

    /// Installs or removes the asynchronous listener.
    ///
    /// Messages start flowing to the listener once the connection is started.
    /// Requires a tokio runtime, which runs the session's dispatcher task.
    pub fn set_message_listener(&self, listener: Option<Arc<dyn MessageListener>>) -> Result<()> {
        if self.inner.is_closed() {
            return Err(JmsError::illegal_state("consumer is closed"));
        }
        self.session.ensure_open()?;
        if listener.is_some() {
            self.session.ensure_dispatcher()?;
        }
        *self.inner.listener.lock() = listener;
        self.session.listener_changed.notify_one();
        Ok(())
    }

    pub fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.inner.listener()
    }

    /// Closes the consumer.
    ///
    /// Waits for a delivery in progress on the session unless called from
    /// that session's own listener. Unacknowledged messages stay with the
    /// session until it acknowledges, commits, recovers or closes.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.cancel.cancel();
        if !self.session.is_callback_task() {
            drop(self.session.delivery_lock.lock().await);
        }
        self.session.remove_consumer(&self.inner);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

async fn nap_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
