use std::sync::Arc;

use super::*;
use crate::config::Settings;
use crate::message::Message;
use crate::selector::Selector;
use crate::utils::{JmsError, Result};

fn broker() -> Arc<Broker> {
    Broker::new(Settings::default())
}

fn strict_broker() -> Arc<Broker> {
    let mut settings = Settings::default();
    settings.broker.auto_create_destinations = false;
    Broker::new(settings)
}

fn text(body: &str) -> Message {
    let mut msg = Message::text(body);
    msg.make_read_only();
    msg
}

fn send(broker: &Broker, destination: &Destination, message: Message) -> Result<()> {
    let route = broker.resolve(destination)?;
    broker.deliver(&route, message);
    Ok(())
}

fn body(msg: &Message) -> String {
    msg.get_text().unwrap().unwrap_or_default().to_string()
}

fn request(topic: &Destination, selector: Option<&str>) -> SubscriptionRequest {
    SubscriptionRequest {
        topic: topic.clone(),
        selector: Selector::optional(selector).unwrap(),
        no_local: false,
        connection: 1,
    }
}

#[test]
fn test_destination_display() {
    assert_eq!(Destination::queue("orders").to_string(), "queue://orders");
    assert_eq!(Destination::topic("prices").to_string(), "topic://prices");
}

#[test]
fn test_declare_is_idempotent() {
    let registry = DestinationRegistry::new();
    let queue = Destination::queue("orders");
    registry.declare(&queue).unwrap();
    registry.declare(&queue).unwrap();
    assert_eq!(registry.queue_names(), vec!["orders".to_string()]);
}

#[test]
fn test_queues_and_topics_are_disjoint() {
    let registry = DestinationRegistry::new();
    registry.declare(&Destination::queue("events")).unwrap();
    assert!(registry.contains(&Destination::queue("events")));
    assert!(!registry.contains(&Destination::topic("events")));
}

#[test]
fn test_declare_rejects_reserved_and_empty_names() {
    let registry = DestinationRegistry::new();
    assert!(matches!(
        registry.declare(&Destination::queue("temporary.mine")),
        Err(JmsError::InvalidDestination(_))
    ));
    assert!(matches!(
        registry.declare(&Destination::topic("")),
        Err(JmsError::InvalidDestination(_))
    ));
}

#[test]
fn test_temporary_destinations_are_owned() {
    let registry = DestinationRegistry::new();
    let temp = registry.create_temporary(DestinationKind::Queue, 7);
    assert!(temp.is_temporary());
    assert!(temp.name().starts_with(TEMPORARY_PREFIX));
    assert_eq!(registry.owner_of(&temp), Some(7));
    assert_eq!(registry.owned_by(7), vec![temp.clone()]);
    assert!(registry.declare(&temp).is_err());

    assert!(registry.remove_temporary(&temp));
    assert!(!registry.remove_temporary(&temp));
    assert!(registry.queue(&temp, true).is_err());
}

#[test]
fn test_store_is_fifo() {
    let store = MessageStore::new("q");
    for i in 0..5 {
        store.enqueue(text(&i.to_string()));
    }
    for i in 0..5 {
        let (seq, msg) = store.poll(None, 0).unwrap();
        assert_eq!(body(&msg), i.to_string());
        store.acknowledge(seq);
    }
    assert!(store.poll(None, 0).is_none());
}

#[test]
fn test_store_skips_delivered_until_requeued() {
    let store = MessageStore::new("q");
    store.enqueue(text("a"));
    store.enqueue(text("b"));

    let (first, msg) = store.poll(None, 0).unwrap();
    assert!(!msg.redelivered());
    assert_eq!(msg.delivery_count(), Some(1));
    let (_, msg) = store.poll(None, 0).unwrap();
    assert_eq!(body(&msg), "b");
    assert_eq!(store.in_flight(), 2);

    store.requeue(first);
    let (_, msg) = store.poll(None, 0).unwrap();
    assert_eq!(body(&msg), "a");
    assert!(msg.redelivered());
    assert_eq!(msg.delivery_count(), Some(2));
}

#[test]
fn test_store_applies_selector() {
    let store = MessageStore::new("q");
    let mut red = Message::text("red");
    red.set_property("color", "red").unwrap();
    let mut blue = Message::text("blue");
    blue.set_property("color", "blue").unwrap();
    store.enqueue(red);
    store.enqueue(blue);

    let selector = Selector::parse("color = 'blue'").unwrap();
    let (_, msg) = store.poll(Some(&selector), 0).unwrap();
    assert_eq!(body(&msg), "blue");
    assert!(store.poll(Some(&selector), 0).is_none());
    assert_eq!(store.depth(0), 1);
}

#[test]
fn test_store_honours_delivery_time_and_expiration() {
    let store = MessageStore::new("q");
    let mut later = Message::text("later");
    later.header_mut().delivery_time = 1_000;
    let mut stale = Message::text("stale");
    stale.header_mut().expiration = 500;
    store.enqueue(later);
    store.enqueue(stale);

    assert_eq!(store.next_delivery_time(100), Some(1_000));
    let (_, msg) = store.poll(None, 100).unwrap();
    assert_eq!(body(&msg), "stale");
    store.requeue(0);
    store.requeue(1);

    // at 1000 the second message has expired and is evicted
    let (_, msg) = store.poll(None, 1_000).unwrap();
    assert_eq!(body(&msg), "later");
    assert!(store.poll(None, 1_000).is_none());
    assert_eq!(store.next_delivery_time(1_000), None);
}

#[test]
fn test_store_browse_does_not_consume() {
    let store = MessageStore::new("q");
    store.enqueue(text("a"));
    store.enqueue(text("b"));
    assert_eq!(store.browse(None, 0).len(), 2);
    assert_eq!(store.depth(0), 2);
    store.purge();
    assert_eq!(store.depth(0), 0);
}

#[test]
fn test_durable_subscription_rules() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("prices");

    assert!(matches!(
        subs.create_durable("s", None, request(&topic, None)),
        Err(JmsError::IllegalState(_))
    ));

    let sub = subs.create_durable("s", Some("c1"), request(&topic, None)).unwrap();
    // unshared and already active
    assert!(matches!(
        subs.create_durable("s", Some("c1"), request(&topic, None)),
        Err(JmsError::IllegalState(_))
    ));
    // shared vs unshared mismatch, even with the same config
    assert!(subs
        .create_shared_durable("s", Some("c1"), request(&topic, None))
        .is_err());

    subs.release(&sub);
    let again = subs.create_durable("s", Some("c1"), request(&topic, None)).unwrap();
    assert!(Arc::ptr_eq(&sub, &again));
    subs.release(&again);
    assert!(subs.find_durable("s", Some("c1")).is_some());
}

#[test]
fn test_durable_subscription_replaced_on_config_change() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("prices");
    let sub = subs.create_durable("s", Some("c1"), request(&topic, None)).unwrap();
    subs.publish(&topic, &text("buffered"));
    subs.release(&sub);

    let replaced = subs
        .create_durable("s", Some("c1"), request(&topic, Some("x = 1")))
        .unwrap();
    assert!(!Arc::ptr_eq(&sub, &replaced));
    assert_eq!(sub.store().depth(0), 0);
    assert_eq!(replaced.store().depth(0), 0);

    // different config while active
    assert!(subs
        .create_durable("s", Some("c1"), request(&topic, None))
        .is_err());
}

#[test]
fn test_shared_subscription_admits_many_consumers() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("work");
    let a = subs
        .create_shared_non_durable("pool", None, request(&topic, None))
        .unwrap();
    let b = subs
        .create_shared_non_durable("pool", None, request(&topic, None))
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.consumer_count(), 2);

    subs.release(&a);
    assert_eq!(subs.len(), 1);
    subs.release(&b);
    assert!(subs.is_empty());
}

#[test]
fn test_durable_and_non_durable_with_same_name_are_independent() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("t");
    let durable = subs
        .create_shared_durable("same", Some("c"), request(&topic, None))
        .unwrap();
    let shared = subs
        .create_shared_non_durable("same", Some("c"), request(&topic, Some("a = 1")))
        .unwrap();
    assert!(!Arc::ptr_eq(&durable, &shared));
    assert_eq!(subs.len(), 2);
}

#[test]
fn test_unsubscribe() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("t");
    assert!(matches!(
        subs.unsubscribe("missing", Some("c")),
        Err(JmsError::InvalidDestination(_))
    ));

    let sub = subs.create_durable("d", Some("c"), request(&topic, None)).unwrap();
    assert!(subs.unsubscribe("d", Some("c")).is_err());
    subs.release(&sub);

    subs.publish(&topic, &text("pending"));
    let (seq, _) = sub.store().poll(None, 0).unwrap();
    assert!(subs.unsubscribe("d", Some("c")).is_err());
    sub.store().acknowledge(seq);

    subs.unsubscribe("d", Some("c")).unwrap();
    assert!(subs.find_durable("d", Some("c")).is_none());
}

#[test]
fn test_publish_applies_selector_and_no_local() {
    let subs = SubscriptionManager::new();
    let topic = Destination::topic("t");
    let all = subs.create_non_durable(request(&topic, None));
    let red = subs.create_non_durable(request(&topic, Some("color = 'red'")));
    let mut local = request(&topic, None);
    local.no_local = true;
    let remote_only = subs.create_non_durable(local);

    let mut msg = Message::text("x");
    msg.set_property("color", "blue").unwrap();
    msg.origin = Some(1);
    assert_eq!(subs.publish(&topic, &msg), 1);
    assert_eq!(all.store().depth(0), 1);
    assert_eq!(red.store().depth(0), 0);
    assert_eq!(remote_only.store().depth(0), 0);

    msg.origin = Some(2);
    assert_eq!(subs.publish(&topic, &msg), 2);
    assert_eq!(remote_only.store().depth(0), 1);
}

#[test]
fn test_broker_auto_creates_destinations() {
    let broker = broker();
    send(&broker, &Destination::queue("q"), text("hello")).unwrap();
    assert_eq!(broker.queue_depth("q"), Some(1));
    assert_eq!(broker.queue_depth("unknown"), None);
}

#[test]
fn test_strict_broker_requires_declaration() {
    let broker = strict_broker();
    let queue = Destination::queue("q");
    assert!(matches!(
        send(&broker, &queue, text("hello")),
        Err(JmsError::InvalidDestination(_))
    ));
    broker.declare(&queue).unwrap();
    send(&broker, &queue, text("hello")).unwrap();
    assert_eq!(broker.queue_depth("q"), Some(1));
}

#[test]
fn test_broker_delete_temporary() {
    let broker = broker();
    let temp = broker.create_temporary(DestinationKind::Queue, 3).unwrap();
    let entry = broker.queue(&temp).unwrap();
    entry.attach();
    assert!(matches!(
        broker.delete_temporary(&temp),
        Err(JmsError::IllegalState(_))
    ));
    entry.detach();
    broker.delete_temporary(&temp).unwrap();
    assert!(matches!(
        send(&broker, &temp, text("late")),
        Err(JmsError::InvalidDestination(_))
    ));
    assert!(broker.delete_temporary(&Destination::queue("q")).is_err());
}

#[test]
fn test_client_ids_are_unique() {
    let broker = broker();
    broker.claim_client_id("app").unwrap();
    assert!(matches!(
        broker.claim_client_id("app"),
        Err(JmsError::InvalidClientId(_))
    ));
    broker.release_client_id("app");
    broker.claim_client_id("app").unwrap();
    assert!(broker.claim_client_id(" ").is_err());
}

#[test]
fn test_shutdown_fails_later_operations() {
    let broker = broker();
    broker.shutdown();
    assert!(broker.is_shut_down());
    assert!(matches!(
        broker.declare(&Destination::queue("q")),
        Err(JmsError::Internal(_))
    ));
    assert!(matches!(
        send(&broker, &Destination::queue("q"), text("x")),
        Err(JmsError::Internal(_))
    ));
    // idempotent
    broker.shutdown();
}
