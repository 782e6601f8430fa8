use std::sync::Arc;
use std::time::Duration;

use super::Producer;
use crate::client::Connection;
use crate::destination::{Destination, DestinationRegistry};
use crate::message::{
    ConverterRegistry, DeliveryMode, Envelope, Expiration, Order, Payload, Priority, Qos,
};
use crate::utils::error::{SendErrorKind, TransactionError};

const SHORT: Duration = Duration::from_millis(50);

fn producer_with(registry: DestinationRegistry) -> (Connection, Producer) {
    let connection = Connection::in_memory().unwrap();
    let mut converters = ConverterRegistry::new();
    converters.register::<Order>(Order::TYPE_TAG);
    let producer = Producer::new(&connection, Arc::new(registry), Arc::new(converters));
    (connection, producer)
}

fn producer() -> (Connection, Producer) {
    producer_with(DestinationRegistry::default())
}

async fn take(connection: &Connection, destination: &Destination) -> Envelope {
    connection
        .create_session()
        .receive(destination, SHORT)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_send_stamps_fresh_id_and_clears_redelivery() {
    let (connection, producer) = producer();
    let queue = Destination::queue("q");
    let mut envelope = Envelope::new("hi").with_priority(Priority::HIGHEST);
    envelope.redelivered = true;
    envelope.delivery_count = 7;
    let original_id = envelope.id;

    let id = producer.send(&queue, envelope).unwrap();
    assert_ne!(id, original_id);

    let received = take(&connection, &queue).await;
    assert_eq!(received.id, id);
    assert!(!received.redelivered);
    assert_eq!(received.delivery_count, 1);
    assert_eq!(received.priority, Priority::HIGHEST);
}

#[tokio::test]
async fn test_send_with_qos_stamps_expiration() {
    let (connection, producer) = producer();
    let queue = Destination::queue("q");

    producer
        .send_with_qos(
            &queue,
            "hello",
            DeliveryMode::Durable,
            Priority::new(9).unwrap(),
            Duration::from_millis(60_000),
        )
        .unwrap();

    let received = take(&connection, &queue).await;
    assert_eq!(received.delivery_mode, DeliveryMode::Durable);
    assert_eq!(received.priority.value(), 9);
    let Expiration::At(deadline) = received.expiration else {
        panic!("expected a deadline");
    };
    let ttl = deadline - received.timestamp;
    assert!(ttl <= chrono::Duration::milliseconds(60_000));
    assert!(ttl > chrono::Duration::milliseconds(59_000));
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let (connection, producer) = producer();
    let queue = Destination::queue("q");
    producer
        .send_with_qos(&queue, "forever", DeliveryMode::Transient, Priority::NORMAL, Duration::ZERO)
        .unwrap();
    assert_eq!(take(&connection, &queue).await.expiration, Expiration::Never);
}

#[tokio::test]
async fn test_default_qos_comes_from_registry() {
    let mut registry = DestinationRegistry::new(Qos::new(
        DeliveryMode::Transient,
        Priority::NORMAL,
        Duration::ZERO,
    ));
    registry.register_with_qos(
        Destination::queue("urgent"),
        Qos::new(DeliveryMode::Durable, Priority::HIGHEST, Duration::ZERO),
    );
    let (connection, producer) = producer_with(registry);

    producer.send_text("urgent", "now").unwrap();
    producer.send_text("whenever", "later").unwrap();

    let urgent = take(&connection, &Destination::queue("urgent")).await;
    assert_eq!(urgent.priority, Priority::HIGHEST);
    assert_eq!(urgent.delivery_mode, DeliveryMode::Durable);

    let plain = take(&connection, &Destination::queue("whenever")).await;
    assert_eq!(plain.priority, Priority::NORMAL);
    assert_eq!(plain.delivery_mode, DeliveryMode::Transient);
}

#[tokio::test]
async fn test_send_object_uses_converter() {
    let (connection, producer) = producer();
    let queue = Destination::queue("orders");
    let order = Order::new("ORD-1", "Laptop", 2, 999.99);

    producer.send_object(&queue, &order).unwrap();

    let received = take(&connection, &queue).await;
    assert_eq!(received.payload.type_tag(), Some(Order::TYPE_TAG));
}

#[test]
fn test_send_object_without_converter_is_serialization_error() {
    let (connection, producer) = producer();
    let queue = Destination::queue("orders");

    let err = producer.send_object(&queue, &42_u32).unwrap_err();
    assert_eq!(err.kind(), SendErrorKind::Serialization);
    assert_eq!(connection.queue_depth(&queue), 0);
}

#[test]
fn test_send_on_closed_connection_is_connection_error() {
    let (connection, producer) = producer();
    connection.close();
    let err = producer.send_to_queue("q", "lost").unwrap_err();
    assert_eq!(err.kind(), SendErrorKind::Connection);
}

#[test]
fn test_send_to_topic_without_subscribers_is_unrouted() {
    let (connection, producer) = producer();
    producer.send_to_topic("news", "nobody listening").unwrap();
    assert_eq!(connection.stats(&Destination::topic("news")).unrouted, 1);
}

#[test]
fn test_send_transactional_commits_batch() {
    let (connection, producer) = producer();
    let queue = Destination::queue("batch");
    let ids = producer
        .send_transactional(&queue, vec![Payload::from("A"), Payload::from("B")])
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(connection.queue_depth(&queue), 2);
    assert!(!producer.session().in_transaction());
}

#[test]
fn test_send_transactional_inside_open_transaction_fails() {
    let (connection, producer) = producer();
    let queue = Destination::queue("batch");
    let _outer = producer.begin().unwrap();

    let err = producer
        .send_transactional(&queue, vec![Payload::from("A")])
        .unwrap_err();
    assert!(matches!(err, TransactionError::Context(_)));
    assert_eq!(connection.queue_depth(&queue), 0);
}

#[test]
fn test_sends_inside_transaction_wait_for_commit() {
    let (connection, producer) = producer();
    let queue = Destination::queue("held");

    let mut tx = producer.begin().unwrap();
    producer.send_to_queue("held", "A").unwrap();
    assert_eq!(connection.queue_depth(&queue), 0);
    tx.commit().unwrap();
    assert_eq!(connection.queue_depth(&queue), 1);
}
