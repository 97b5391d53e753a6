use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::broker::{Broker, Destination};
use crate::config::Settings;
use crate::message::{DeliveryMode, Message};
use crate::utils::JmsError;

const WAIT: Duration = Duration::from_secs(2);

fn broker() -> Arc<Broker> {
    Broker::new(Settings::default())
}

fn connect(broker: &Arc<Broker>) -> Connection {
    ConnectionFactory::new(broker.clone())
        .create_connection()
        .unwrap()
}

fn text(msg: &Message) -> String {
    msg.get_text().unwrap().unwrap_or_default().to_string()
}

fn send_texts(session: &Session, destination: &Destination, bodies: &[&str]) {
    let producer = session.create_producer(Some(destination)).unwrap();
    for body in bodies {
        producer.send(&mut Message::text(*body)).unwrap();
    }
}

fn channel_listener() -> (Arc<dyn MessageListener>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = move |msg: Message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(msg);
        }
    };
    (Arc::new(listener), rx)
}

struct RecordingCompletion {
    tx: mpsc::UnboundedSender<Result<String, JmsError>>,
}

#[async_trait]
impl CompletionListener for RecordingCompletion {
    async fn on_completion(&self, message: Message) {
        let _ = self.tx.send(Ok(message.message_id().unwrap_or("").to_string()));
    }

    async fn on_exception(&self, _message: Message, error: JmsError) {
        let _ = self.tx.send(Err(error));
    }
}

#[test]
fn test_send_stamps_header_fields() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("orders").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let mut msg = session.create_text_message("hello");
    producer.send(&mut msg).unwrap();

    assert!(msg.message_id().unwrap().starts_with("ID:"));
    assert!(msg.timestamp() > 0);
    assert_eq!(msg.destination(), Some(&queue));
    assert_eq!(msg.delivery_mode(), DeliveryMode::Persistent);
    assert_eq!(msg.priority(), 4);
    assert_eq!(msg.expiration(), 0);
    assert!(msg.is_body_read_only());
    assert_eq!(broker.queue_depth("orders"), Some(1));
}

#[test]
fn test_send_options_and_hints() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    producer.set_disable_message_id(true).unwrap();
    producer.set_disable_timestamp(true).unwrap();
    producer.set_time_to_live(60_000).unwrap();
    producer.set_delivery_mode(DeliveryMode::NonPersistent).unwrap();

    let mut msg = Message::text("x");
    producer.send(&mut msg).unwrap();
    assert!(msg.message_id().is_none());
    assert_eq!(msg.timestamp(), 0);
    assert!(msg.expiration() > 0);
    assert_eq!(msg.delivery_mode(), DeliveryMode::NonPersistent);

    assert!(matches!(
        producer.set_priority(10),
        Err(JmsError::InvalidArgument(_))
    ));
    assert!(matches!(
        producer.set_delivery_delay(-1),
        Err(JmsError::InvalidArgument(_))
    ));
    assert_eq!(producer.priority(), 4);
}

#[test]
fn test_producer_destination_rules() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();

    let unidentified = session.create_producer(None).unwrap();
    assert!(matches!(
        unidentified.send(&mut Message::text("x")),
        Err(JmsError::UnsupportedOperation(_))
    ));
    unidentified.send_to(&queue, &mut Message::text("x")).unwrap();

    let bound = session.create_producer(Some(&queue)).unwrap();
    assert!(matches!(
        bound.send_to(&queue, &mut Message::text("x")),
        Err(JmsError::UnsupportedOperation(_))
    ));

    bound.close();
    bound.close();
    assert!(matches!(
        bound.send(&mut Message::text("x")),
        Err(JmsError::IllegalState(_))
    ));
}

#[test]
fn test_client_id_rules() {
    let broker = broker();
    let first = connect(&broker);
    first.set_client_id("app").unwrap();
    assert_eq!(first.client_id().as_deref(), Some("app"));
    assert!(matches!(
        first.set_client_id("other"),
        Err(JmsError::IllegalState(_))
    ));

    let second = connect(&broker);
    assert!(matches!(
        second.set_client_id("app"),
        Err(JmsError::InvalidClientId(_))
    ));

    let third = connect(&broker);
    third.create_session(AcknowledgeMode::Auto).unwrap();
    assert!(matches!(
        third.set_client_id("late"),
        Err(JmsError::IllegalState(_))
    ));

    let factory = ConnectionFactory::new(broker.clone()).with_client_id("fixed");
    let fixed = factory.create_connection().unwrap();
    assert_eq!(fixed.client_id().as_deref(), Some("fixed"));
    assert!(factory.create_connection().is_err());
}

#[test]
fn test_connection_metadata() {
    let connection = connect(&broker());
    let meta = connection.metadata();
    assert_eq!(meta.jms_version, "2.0");
    assert_eq!(meta.jms_major_version, 2);
    assert_eq!(meta.provider_name, "popmq");
    assert!(meta.jmsx_property_names.contains(&"JMSXDeliveryCount"));
}

#[tokio::test]
async fn test_receive_waits_for_start() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    send_texts(&session, &queue, &["a"]);

    assert!(consumer.receive_no_wait().await.unwrap().is_none());
    assert!(
        consumer
            .receive_timeout(Duration::from_millis(50))
            .await
            .unwrap()
            .is_none()
    );

    connection.start().unwrap();
    let msg = consumer.receive_no_wait().await.unwrap().unwrap();
    assert_eq!(text(&msg), "a");
    assert!(msg.is_body_read_only());
    assert_eq!(broker.queue_depth("q"), Some(0));
}

#[tokio::test]
async fn test_receive_wakes_on_send() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();

    let sender = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let target = queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        send_texts(&sender, &target, &["late"]);
    });

    let msg = timeout(WAIT, consumer.receive()).await.unwrap().unwrap().unwrap();
    assert_eq!(text(&msg), "late");
}

#[tokio::test]
async fn test_delivery_delay_holds_message_back() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();
    producer.set_delivery_delay(100).unwrap();
    producer.send(&mut Message::text("later")).unwrap();

    let consumer = session.create_consumer(&queue).unwrap();
    assert!(consumer.receive_no_wait().await.unwrap().is_none());
    let msg = consumer.receive_timeout(WAIT).await.unwrap().unwrap();
    assert_eq!(text(&msg), "later");
}

#[tokio::test]
async fn test_client_acknowledge_is_cumulative() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();
    let session = connection.create_session(AcknowledgeMode::Client).unwrap();
    let queue = session.create_queue("q").unwrap();
    send_texts(&session, &queue, &["0", "1", "2"]);
    let consumer = session.create_consumer(&queue).unwrap();

    let _first = consumer.receive_no_wait().await.unwrap().unwrap();
    let second = consumer.receive_no_wait().await.unwrap().unwrap();
    let _third = consumer.receive_no_wait().await.unwrap().unwrap();
    second.acknowledge().unwrap();

    session.recover().unwrap();
    assert_eq!(broker.queue_depth("q"), Some(1));
    let again = consumer.receive_no_wait().await.unwrap().unwrap();
    assert_eq!(text(&again), "2");
    assert!(again.redelivered());
    assert_eq!(again.delivery_count(), Some(2));
}

#[tokio::test]
async fn test_transacted_session() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();
    let session = connection.create_session(AcknowledgeMode::Transacted).unwrap();
    assert!(session.is_transacted());
    let queue = session.create_queue("q").unwrap();

    send_texts(&session, &queue, &["a", "b"]);
    assert_eq!(broker.queue_depth("q"), Some(0));
    session.rollback().unwrap();
    assert_eq!(broker.queue_depth("q"), Some(0));

    send_texts(&session, &queue, &["c"]);
    session.commit().unwrap();
    assert_eq!(broker.queue_depth("q"), Some(1));

    let consumer = session.create_consumer(&queue).unwrap();
    let msg = consumer.receive_no_wait().await.unwrap().unwrap();
    assert_eq!(text(&msg), "c");
    session.rollback().unwrap();
    let msg = consumer.receive_no_wait().await.unwrap().unwrap();
    assert!(msg.redelivered());
    session.commit().unwrap();
    assert_eq!(broker.queue_depth("q"), Some(0));

    assert!(matches!(session.recover(), Err(JmsError::IllegalState(_))));
}

#[test]
fn test_commit_requires_transacted_session() {
    let connection = connect(&broker());
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    assert!(matches!(session.commit(), Err(JmsError::IllegalState(_))));
    assert!(matches!(session.rollback(), Err(JmsError::IllegalState(_))));
    session.recover().unwrap();
}

#[tokio::test]
async fn test_commit_rolls_back_when_destination_is_gone() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Transacted).unwrap();
    let temp = session.create_temporary_queue().unwrap();
    send_texts(&session, &temp, &["x"]);
    session.delete_temporary(&temp).unwrap();

    assert!(matches!(
        session.commit(),
        Err(JmsError::TransactionRolledBack(_))
    ));
    // the transaction is over; the next one starts empty
    session.commit().unwrap();
}

#[tokio::test]
async fn test_listener_receives_in_order() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let (listener, mut rx) = channel_listener();
    consumer.set_message_listener(Some(listener)).unwrap();

    assert!(matches!(
        consumer.receive_no_wait().await,
        Err(JmsError::IllegalState(_))
    ));

    send_texts(&session, &queue, &["0", "1", "2"]);
    connection.start().unwrap();
    for expected in ["0", "1", "2"] {
        let msg = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(text(&msg), expected);
    }
    connection.close().await.unwrap();
    assert_eq!(broker.queue_depth("q"), Some(0));
}

#[tokio::test]
async fn test_stop_suspends_listeners() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    let (listener, mut rx) = channel_listener();
    consumer.set_message_listener(Some(listener)).unwrap();
    connection.start().unwrap();
    connection.stop().await.unwrap();

    send_texts(&session, &queue, &["held"]);
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

    connection.start().unwrap();
    let msg = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(text(&msg), "held");
}

#[tokio::test]
async fn test_session_cannot_close_itself_from_listener() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let own = session.clone();
    let listener = move |_msg: Message| {
        let own = own.clone();
        let tx = tx.clone();
        async move {
            let _ = tx.send(own.close().await);
        }
    };
    let listener: Arc<dyn MessageListener> = Arc::new(listener);
    consumer.set_message_listener(Some(listener)).unwrap();
    connection.start().unwrap();
    send_texts(&session, &queue, &["x"]);

    let outcome = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(JmsError::IllegalState(_))));
    session.close().await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_send_async_reports_completion() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Arc::new(RecordingCompletion { tx });
    producer.send_async(None, Message::text("a"), listener.clone()).unwrap();
    let id = timeout(WAIT, rx.recv()).await.unwrap().unwrap().unwrap();
    assert!(id.starts_with("ID:"));
    assert_eq!(broker.queue_depth("q"), Some(1));

    // an invalid destination is reported to the listener, not the caller
    let strict = Broker::new({
        let mut settings = Settings::default();
        settings.broker.auto_create_destinations = false;
        settings
    });
    let other = connect(&strict).create_session(AcknowledgeMode::Auto).unwrap();
    let unknown = other.create_producer(None).unwrap();
    unknown
        .send_async(Some(&Destination::queue("nowhere")), Message::text("b"), listener)
        .unwrap();
    let outcome = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(JmsError::InvalidDestination(_))));
}

#[tokio::test]
async fn test_durable_consumer_requires_client_id() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let topic = session.create_topic("news").unwrap();
    assert!(matches!(
        session.create_durable_consumer(&topic, "sub", None, false),
        Err(JmsError::IllegalState(_))
    ));
    let queue = session.create_queue("q").unwrap();
    assert!(matches!(
        session.create_shared_durable_consumer(&queue, "sub", None),
        Err(JmsError::InvalidDestination(_))
    ));

    let named = ConnectionFactory::new(broker.clone())
        .with_client_id("reader")
        .create_connection()
        .unwrap();
    let session = named.create_session(AcknowledgeMode::Auto).unwrap();
    let consumer = session
        .create_durable_consumer(&topic, "sub", None, false)
        .unwrap();
    consumer.close().await.unwrap();

    // messages published while no consumer is active are kept
    send_texts(&session, &topic, &["kept"]);
    named.start().unwrap();
    let consumer = session
        .create_durable_consumer(&topic, "sub", None, false)
        .unwrap();
    let msg = consumer.receive_no_wait().await.unwrap().unwrap();
    assert_eq!(text(&msg), "kept");

    assert!(session.unsubscribe("sub").is_err());
    consumer.close().await.unwrap();
    session.unsubscribe("sub").unwrap();
}

#[tokio::test]
async fn test_temporary_queue_belongs_to_its_connection() {
    let broker = broker();
    let owner = connect(&broker);
    let owner_session = owner.create_session(AcknowledgeMode::Auto).unwrap();
    let temp = owner_session.create_temporary_queue().unwrap();

    let other = connect(&broker);
    let other_session = other.create_session(AcknowledgeMode::Auto).unwrap();
    assert!(matches!(
        other_session.create_consumer(&temp),
        Err(JmsError::IllegalState(_))
    ));
    assert!(matches!(
        other_session.delete_temporary(&temp),
        Err(JmsError::IllegalState(_))
    ));
    // anyone may send to it
    send_texts(&other_session, &temp, &["reply"]);

    owner.close().await.unwrap();
    assert!(matches!(
        other_session.create_producer(Some(&temp)).unwrap().send(&mut Message::text("x")),
        Err(JmsError::InvalidDestination(_))
    ));
}

#[tokio::test]
async fn test_browser_does_not_consume() {
    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let producer = session.create_producer(Some(&queue)).unwrap();
    for color in ["red", "blue", "red"] {
        let mut msg = Message::text(color);
        msg.set_property("color", color).unwrap();
        producer.send(&mut msg).unwrap();
    }

    let browser = session.create_browser(&queue, Some("color = 'red'")).unwrap();
    assert_eq!(browser.message_selector(), Some("color = 'red'"));
    assert_eq!(browser.enumerate().unwrap().len(), 2);
    assert_eq!(broker.queue_depth("q"), Some(3));

    browser.close();
    assert!(browser.enumerate().is_err());
    let topic = session.create_topic("t").unwrap();
    assert!(session.create_browser(&topic, None).is_err());
}

#[tokio::test]
async fn test_requestor_round_trip() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();

    let service = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let requests = service.create_queue("service").unwrap();
    let inbox = service.create_consumer(&requests).unwrap();
    let replies = service.create_producer(None).unwrap();
    tokio::spawn(async move {
        if let Ok(Some(request)) = inbox.receive().await {
            let mut reply = Message::text(format!("echo: {}", text(&request)));
            reply.set_correlation_id(request.message_id().map(str::to_string));
            if let Some(reply_to) = request.reply_to() {
                let _ = replies.send_to(reply_to, &mut reply);
            }
        }
    });

    let client = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let requestor = Requestor::new(&client, &requests).unwrap();
    let mut request = Message::text("ping");
    let reply = requestor
        .request(&mut request, Some(WAIT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text(&reply), "echo: ping");
    assert_eq!(reply.correlation_id(), request.message_id());

    let temp = requestor.reply_to().clone();
    requestor.close().await.unwrap();
    assert!(!broker.destinations().contains(&temp));
    assert!(client.is_closed());

    let transacted = connection.create_session(AcknowledgeMode::Transacted).unwrap();
    assert!(Requestor::new(&transacted, &requests).is_err());
}

#[tokio::test]
async fn test_context_auto_starts_and_acknowledges() {
    let broker = broker();
    let factory = ConnectionFactory::new(broker.clone());
    let context = factory.create_context(AcknowledgeMode::Client).unwrap();
    let queue = context.create_queue("q").unwrap();

    let mut producer = context.create_producer().unwrap();
    producer
        .set_property("kind", "greeting")
        .unwrap()
        .set_jms_type(Some("note".to_string()));
    let sent = producer.send_text(&queue, "hi").unwrap();
    assert_eq!(sent.get_string_property("kind").unwrap().as_deref(), Some("greeting"));
    producer.send_map(&queue, [("n", 1)]).unwrap();

    let consumer = context.create_consumer(&queue).unwrap();
    let first = consumer.receive_timeout(WAIT).await.unwrap().unwrap();
    assert_eq!(text(&first), "hi");
    assert_eq!(first.jms_type(), Some("note"));
    let second = consumer.receive_timeout(WAIT).await.unwrap().unwrap();
    assert_eq!(second.as_map().unwrap().get_int("n").unwrap(), Some(1));

    context.acknowledge().unwrap();
    context.recover().unwrap();
    assert_eq!(broker.queue_depth("q"), Some(0));

    let child = context.create_context(AcknowledgeMode::Auto).unwrap();
    context.close().await.unwrap();
    // the shared connection is still open for the child
    child.create_producer().unwrap().send_text(&queue, "still open").unwrap();
    child.close().await.unwrap();
    assert!(child.create_producer().is_err());
}

#[tokio::test]
async fn test_context_rejects_bad_producer_property() {
    let context = ConnectionFactory::new(broker())
        .create_context(AcknowledgeMode::Auto)
        .unwrap();
    let mut producer = context.create_producer().unwrap();
    assert!(producer.set_property("JMSXDeliveryCount", 1).is_err());
    assert!(producer.set_property("", 1).is_err());
    assert!(producer.set_priority(12).is_err());
    assert_eq!(producer.options().priority, 4);
    context.close().await.unwrap();
}

#[tokio::test]
async fn test_receive_timeout_accepts_unbounded_duration() {
    let broker = broker();
    let connection = connect(&broker);
    connection.start().unwrap();
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let queue = session.create_queue("q").unwrap();
    let consumer = session.create_consumer(&queue).unwrap();
    send_texts(&session, &queue, &["a"]);

    let msg = consumer.receive_timeout(Duration::MAX).await.unwrap().unwrap();
    assert_eq!(text(&msg), "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listeners_of_one_session_never_overlap() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let first = session.create_queue("first").unwrap();
    let second = session.create_queue("second").unwrap();

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut consumers = Vec::new();
    for queue in [&first, &second] {
        let consumer = session.create_consumer(queue).unwrap();
        let (active, peak, tx) = (active.clone(), peak.clone(), tx.clone());
        let listener = move |_msg: Message| {
            let (active, peak, tx) = (active.clone(), peak.clone(), tx.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            }
        };
        let listener: Arc<dyn MessageListener> = Arc::new(listener);
        consumer.set_message_listener(Some(listener)).unwrap();
        consumers.push(consumer);
    }

    let bodies: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let bodies: Vec<&str> = bodies.iter().map(String::as_str).collect();
    send_texts(&session, &first, &bodies);
    send_texts(&session, &second, &bodies);
    connection.start().unwrap();

    for _ in 0..20 {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    connection.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receive_waits_for_running_listener() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let broker = broker();
    let connection = connect(&broker);
    let session = connection.create_session(AcknowledgeMode::Auto).unwrap();
    let listened = session.create_queue("listened").unwrap();
    let polled = session.create_queue("polled").unwrap();
    let listening = session.create_consumer(&listened).unwrap();
    let receiving = session.create_consumer(&polled).unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let flag = finished.clone();
    let listener = move |_msg: Message| {
        let (flag, tx) = (flag.clone(), tx.clone());
        async move {
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        }
    };
    let listener: Arc<dyn MessageListener> = Arc::new(listener);
    listening.set_message_listener(Some(listener)).unwrap();

    send_texts(&session, &polled, &["waiting"]);
    send_texts(&session, &listened, &["slow"]);
    connection.start().unwrap();

    timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let msg = timeout(WAIT, receiving.receive_no_wait())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(text(&msg), "waiting");
    assert!(finished.load(Ordering::SeqCst));
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_context_close_from_listener_can_be_retried() {
    let broker = broker();
    let context = Arc::new(
        ConnectionFactory::new(broker.clone())
            .create_context(AcknowledgeMode::Auto)
            .unwrap(),
    );
    let queue = context.create_queue("q").unwrap();
    let temp = context.create_temporary_queue().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let own = context.clone();
    let listener = move |_msg: Message| {
        let (own, tx) = (own.clone(), tx.clone());
        async move {
            let _ = tx.send(own.close().await);
        }
    };
    let listener: Arc<dyn MessageListener> = Arc::new(listener);
    let consumer = context.create_consumer(&queue).unwrap();
    consumer.set_message_listener(Some(listener)).unwrap();
    context.create_producer().unwrap().send_text(&queue, "x").unwrap();

    let outcome = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(JmsError::IllegalState(_))));
    assert!(broker.queue(&temp).is_ok());

    context.close().await.unwrap();
    assert!(broker.queue(&temp).is_err());
    assert!(context.create_producer().is_err());
}
