//! Application callbacks.
//!
//! Plain closures implement each trait, so `|msg| async move { .. }` can be
//! passed wherever a listener is expected.

use std::future::Future;

use async_trait::async_trait;

use crate::message::Message;
use crate::utils::JmsError;

/// Receives messages asynchronously.
///
/// Calls for the consumers of one session never overlap, and never overlap
/// with a synchronous receive on that session.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: Message);
}

#[async_trait]
impl<F, Fut> MessageListener for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_message(&self, message: Message) {
        (self)(message).await
    }
}

/// Outcome of an asynchronous send.
#[async_trait]
pub trait CompletionListener: Send + Sync {
    async fn on_completion(&self, message: Message);

    async fn on_exception(&self, message: Message, error: JmsError);
}

/// Told about failures that end a connection.
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, error: JmsError);
}

impl<F> ExceptionListener for F
where
    F: Fn(JmsError) + Send + Sync,
{
    fn on_exception(&self, error: JmsError) {
        (self)(error)
    }
}
