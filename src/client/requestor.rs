use std::time::Duration;

use crate::broker::{Destination, DestinationKind};
use crate::client::consumer::MessageConsumer;
use crate::client::producer::MessageProducer;
use crate::client::session::Session;
use crate::message::Message;
use crate::utils::{JmsError, Result};

/// Request/reply helper over a temporary reply destination.
///
/// Every request carries the temporary destination as its `JMSReplyTo`, and
/// the next message arriving there is returned as the reply. The session must
/// not be transacted, and its connection must be started for replies to
/// arrive.
#[derive(Debug)]
pub struct Requestor {
    session: Session,
    reply_to: Destination,
    producer: MessageProducer,
    consumer: MessageConsumer,
}

impl Requestor {
    /// Creates a requestor sending to `destination`. The reply destination
    /// has the same kind as `destination`.
    pub fn new(session: &Session, destination: &Destination) -> Result<Self> {
        if session.is_transacted() {
            return Err(JmsError::illegal_state(
                "a requestor needs a non-transacted session",
            ));
        }
        let reply_to = match destination.kind() {
            DestinationKind::Queue => session.create_temporary_queue()?,
            DestinationKind::Topic => session.create_temporary_topic()?,
        };
        let producer = session.create_producer(Some(destination))?;
        let consumer = session.create_consumer(&reply_to)?;
        Ok(Self {
            session: session.clone(),
            reply_to,
            producer,
            consumer,
        })
    }

    pub fn reply_to(&self) -> &Destination {
        &self.reply_to
    }

    /// Sends `message` and waits for the reply, at most `timeout` if given.
    pub async fn request(
        &self,
        message: &mut Message,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>> {
        message.set_reply_to(Some(self.reply_to.clone()));
        self.producer.send(message)?;
        match timeout {
            Some(timeout) => self.consumer.receive_timeout(timeout).await,
            None => self.consumer.receive().await,
        }
    }

    /// Deletes the reply destination and closes the session.
    pub async fn close(&self) -> Result<()> {
        if self.session.is_closed() {
            return Ok(());
        }
        self.consumer.close().await?;
        self.producer.close();
        self.session.delete_temporary(&self.reply_to)?;
        self.session.close().await
    }
}
