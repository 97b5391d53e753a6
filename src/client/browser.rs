use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::broker::Destination;
use crate::broker::destination::QueueEntry;
use crate::client::session::SessionInner;
use crate::message::Message;
use crate::selector::Selector;
use crate::utils::{JmsError, Result, now_millis};

/// Looks at the messages waiting on a queue without consuming them.
pub struct QueueBrowser {
    session: Arc<SessionInner>,
    queue: Arc<QueueEntry>,
    selector: Option<Selector>,
    closed: AtomicBool,
}

impl std::fmt::Debug for QueueBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBrowser")
            .field("queue", &self.queue.destination)
            .field("selector", &self.selector)
            .finish()
    }
}

impl QueueBrowser {
    pub(crate) fn new(
        session: Arc<SessionInner>,
        queue: Arc<QueueEntry>,
        selector: Option<Selector>,
    ) -> Self {
        Self {
            session,
            queue,
            selector,
            closed: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Destination {
        &self.queue.destination
    }

    pub fn message_selector(&self) -> Option<&str> {
        self.selector.as_ref().map(Selector::source)
    }

    /// Snapshot of the queue in delivery order, filtered by the selector.
    ///
    /// Messages already handed to a consumer and messages not yet due are
    /// left out. The returned messages are read-only copies.
    pub fn enumerate(&self) -> Result<Vec<Message>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JmsError::illegal_state("browser is closed"));
        }
        self.session.ensure_open()?;
        Ok(self.queue.store.browse(self.selector.as_ref(), now_millis()))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
