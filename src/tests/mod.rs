//! End-to-end scenarios across connections, sessions and the broker.


use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, Destination};
use crate::client::{AcknowledgeMode, Connection, ConnectionFactory, Session};
use crate::config::Settings;
use crate::message::Message;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

pub(crate) fn broker() -> Arc<Broker> {
    Broker::new(Settings::default())
}

pub(crate) fn started(broker: &Arc<Broker>) -> Connection {
    let connection = ConnectionFactory::new(broker.clone())
        .create_connection()
        .unwrap();
    connection.start().unwrap();
    connection
}

pub(crate) fn auto_session(connection: &Connection) -> Session {
    connection.create_session(AcknowledgeMode::Auto).unwrap()
}

pub(crate) fn send_all(session: &Session, destination: &Destination, bodies: &[String]) {
    let producer = session.create_producer(Some(destination)).unwrap();
    for body in bodies {
        producer.send(&mut Message::text(body.clone())).unwrap();
    }
}

pub(crate) fn body(msg: &Message) -> String {
    msg.get_text().unwrap().unwrap_or_default().to_string()
}
