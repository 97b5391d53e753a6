//! The `client` module is the application-facing side of `popmq`: connections,
//! sessions, producers and consumers, plus the simplified [`JmsContext`] API.
//!
//! Every object is a cheap handle over shared state. Blocking operations are
//! `async` and run on tokio; message listeners are driven by one dispatcher
//! task per session.

pub mod browser;
pub mod connection;
pub mod consumer;
pub mod context;
mod dispatcher;
pub mod listener;
pub mod producer;
pub mod requestor;
pub mod session;

pub use browser::QueueBrowser;
pub use connection::{Connection, ConnectionFactory, ConnectionMetaData};
pub use consumer::MessageConsumer;
pub use context::{JmsContext, JmsProducer};
pub use listener::{CompletionListener, ExceptionListener, MessageListener};
pub use producer::{MessageProducer, SendOptions};
pub use requestor::Requestor;
pub use session::{AcknowledgeMode, Session};

#[cfg(test)]
mod tests;
