use chrono::Utc;
use tempfile::tempdir;
use uuid::Uuid;

use super::engine::group_queue_name;
use super::queue::{Queue, QueuedMessage, Topic};
use super::{Broker, RedeliveryPolicy};
use crate::destination::Destination;
use crate::message::{DeliveryMode, Envelope, Expiration, Priority};
use crate::persistence::Persistence;

fn broker() -> Broker {
    Broker::new(Persistence::temporary().unwrap(), RedeliveryPolicy::default()).unwrap()
}

fn broker_with_policy(policy: RedeliveryPolicy) -> Broker {
    Broker::new(Persistence::temporary().unwrap(), policy).unwrap()
}

fn text(envelope: &Envelope) -> &str {
    envelope.payload.as_text().unwrap()
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("topic://news");
    topic.subscribe("group-a");
    assert!(topic.groups.contains("group-a"));
    topic.unsubscribe("group-a");
    assert!(topic.groups.is_empty());
}

#[test]
fn test_queue_orders_by_priority_then_sequence() {
    let mut queue = Queue::new("queue://q");
    let low = Envelope::new("low").with_priority(Priority::LOWEST);
    let high = Envelope::new("high").with_priority(Priority::HIGHEST);
    let normal_first = Envelope::new("normal-1");
    let normal_second = Envelope::new("normal-2");

    for (seq, envelope) in [low, normal_first, high, normal_second].into_iter().enumerate() {
        queue.push(QueuedMessage {
            seq: seq as u64,
            envelope,
            journaled: false,
        });
    }

    let order: Vec<_> = std::iter::from_fn(|| queue.pop_ready())
        .map(|m| text(&m.envelope).to_string())
        .collect();
    assert_eq!(order, vec!["high", "normal-1", "normal-2", "low"]);
}

#[test]
fn test_enqueue_and_dequeue_marks_in_flight() {
    let mut broker = broker();
    let queue = Destination::queue("orders");
    let session = Uuid::new_v4();

    broker
        .enqueue(vec![(queue.clone(), Envelope::new("hello"))])
        .unwrap();
    assert_eq!(broker.depth("queue://orders"), 1);

    let delivered = broker.dequeue("queue://orders", session, Utc::now()).unwrap();
    assert_eq!(text(&delivered), "hello");
    assert_eq!(delivered.delivery_count, 1);
    assert_eq!(broker.depth("queue://orders"), 0);
    assert_eq!(broker.in_flight("queue://orders"), 1);

    assert!(broker.acknowledge("queue://orders", &delivered.id));
    assert_eq!(broker.in_flight("queue://orders"), 0);
    assert!(!broker.acknowledge("queue://orders", &delivered.id));

    let stats = broker.stats("queue://orders");
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.acknowledged, 1);
}

#[test]
fn test_dequeue_drops_expired_messages() {
    let mut broker = broker();
    let now = Utc::now();
    let expired = Envelope::new("stale")
        .with_expiration(Expiration::At(now - chrono::Duration::seconds(1)));
    let live = Envelope::new("fresh");

    broker
        .enqueue(vec![
            (Destination::queue("q"), expired),
            (Destination::queue("q"), live),
        ])
        .unwrap();

    let delivered = broker.dequeue("queue://q", Uuid::new_v4(), now).unwrap();
    assert_eq!(text(&delivered), "fresh");
    assert_eq!(broker.stats("queue://q").expired, 1);
    assert!(broker.dequeue("queue://q", Uuid::new_v4(), now).is_none());
}

#[test]
fn test_redeliver_sets_flag_and_requeues() {
    let mut broker = broker();
    let session = Uuid::new_v4();
    broker
        .enqueue(vec![(Destination::queue("q"), Envelope::new("retry me"))])
        .unwrap();

    let first = broker.dequeue("queue://q", session, Utc::now()).unwrap();
    assert!(!first.redelivered);
    assert!(broker.redeliver("queue://q", &first.id));

    let second = broker.dequeue("queue://q", session, Utc::now()).unwrap();
    assert_eq!(second.id, first.id);
    assert!(second.redelivered);
    assert_eq!(second.delivery_count, 2);
    assert_eq!(broker.stats("queue://q").redelivered, 1);
}

#[test]
fn test_redelivery_cap_moves_to_dead_letter_queue() {
    let mut broker = broker_with_policy(RedeliveryPolicy {
        max_redeliveries: Some(1),
        dead_letter_queue: Some("DLQ".to_string()),
    });
    let session = Uuid::new_v4();
    broker
        .enqueue(vec![(Destination::queue("q"), Envelope::new("poison"))])
        .unwrap();

    let first = broker.dequeue("queue://q", session, Utc::now()).unwrap();
    broker.redeliver("queue://q", &first.id);
    let second = broker.dequeue("queue://q", session, Utc::now()).unwrap();
    broker.redeliver("queue://q", &second.id);

    assert!(broker.dequeue("queue://q", session, Utc::now()).is_none());
    assert_eq!(broker.stats("queue://q").dead_lettered, 1);

    let dead = broker.dequeue("queue://DLQ", session, Utc::now()).unwrap();
    assert_eq!(text(&dead), "poison");
    assert_eq!(dead.correlation.properties["dead_letter.origin"], "queue://q");
}

#[test]
fn test_dead_letter_without_queue_drops_message() {
    let mut broker = broker();
    let session = Uuid::new_v4();
    broker
        .enqueue(vec![(Destination::queue("q"), Envelope::new("bad"))])
        .unwrap();
    let delivered = broker.dequeue("queue://q", session, Utc::now()).unwrap();

    assert!(broker.dead_letter("queue://q", &delivered.id, "unparseable"));
    assert_eq!(broker.depth("queue://q"), 0);
    assert_eq!(broker.in_flight("queue://q"), 0);
    assert_eq!(broker.stats("queue://q").dead_lettered, 1);
}

#[test]
fn test_failed_dead_letter_write_keeps_original_message() {
    let persistence = Persistence::temporary().unwrap();
    let mut broker = Broker::new(
        persistence.clone(),
        RedeliveryPolicy {
            max_redeliveries: None,
            dead_letter_queue: Some("DLQ".to_string()),
        },
    )
    .unwrap();
    let session = Uuid::new_v4();
    broker
        .enqueue(vec![(
            Destination::queue("q"),
            Envelope::new("keep me").with_delivery_mode(DeliveryMode::Durable),
        )])
        .unwrap();
    let delivered = broker.dequeue("queue://q", session, Utc::now()).unwrap();

    persistence.fail_writes();
    assert!(broker.dead_letter("queue://q", &delivered.id, "unparseable"));

    assert_eq!(broker.depth("queue://q"), 1);
    assert_eq!(broker.depth("queue://DLQ"), 0);
    assert_eq!(broker.stats("queue://q").dead_lettered, 0);
    assert_eq!(persistence.len(), 1);

    let again = broker.dequeue("queue://q", session, Utc::now()).unwrap();
    assert_eq!(again.id, delivered.id);
    assert!(again.redelivered);
}

#[test]
fn test_recover_session_returns_only_its_messages() {
    let mut broker = broker();
    let lost = Uuid::new_v4();
    let alive = Uuid::new_v4();
    broker
        .enqueue(vec![
            (Destination::queue("q"), Envelope::new("a")),
            (Destination::queue("q"), Envelope::new("b")),
        ])
        .unwrap();

    broker.dequeue("queue://q", lost, Utc::now()).unwrap();
    broker.dequeue("queue://q", alive, Utc::now()).unwrap();

    assert_eq!(broker.recover_session(&lost), 1);
    assert_eq!(broker.depth("queue://q"), 1);
    assert_eq!(broker.in_flight("queue://q"), 1);
}

#[test]
fn test_topic_copies_to_each_group() {
    let mut broker = broker();
    let topic = Destination::topic("news");
    let a = broker.subscribe_group(&topic, "a");
    let b = broker.subscribe_group(&topic, "b");
    assert_eq!(a, group_queue_name("topic://news", "a"));

    broker
        .enqueue(vec![(topic.clone(), Envelope::new("headline"))])
        .unwrap();

    let session = Uuid::new_v4();
    assert_eq!(text(&broker.dequeue(&a, session, Utc::now()).unwrap()), "headline");
    assert_eq!(text(&broker.dequeue(&b, session, Utc::now()).unwrap()), "headline");
    assert_eq!(broker.stats("topic://news").delivered, 2);
}

#[test]
fn test_topic_without_groups_is_unrouted() {
    let mut broker = broker();
    broker
        .enqueue(vec![(Destination::topic("void"), Envelope::new("lost"))])
        .unwrap();
    assert_eq!(broker.stats("topic://void").unrouted, 1);
}

#[test]
fn test_unsubscribe_group_discards_its_queue() {
    let mut broker = broker();
    let topic = Destination::topic("news");
    let queue = broker.subscribe_group(&topic, "temp");
    broker
        .enqueue(vec![(topic.clone(), Envelope::new("x"))])
        .unwrap();
    broker.unsubscribe_group(&topic, "temp");
    assert_eq!(broker.depth(&queue), 0);

    broker.enqueue(vec![(topic, Envelope::new("y"))]).unwrap();
    assert_eq!(broker.stats("topic://news").unrouted, 1);
}

#[test]
fn test_durable_messages_replayed_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let mut broker =
            Broker::new(Persistence::new(&path).unwrap(), RedeliveryPolicy::default()).unwrap();
        broker
            .enqueue(vec![
                (
                    Destination::queue("q"),
                    Envelope::new("durable").with_delivery_mode(DeliveryMode::Durable),
                ),
                (
                    Destination::queue("q"),
                    Envelope::new("transient").with_delivery_mode(DeliveryMode::Transient),
                ),
            ])
            .unwrap();
    }

    let mut broker =
        Broker::new(Persistence::new(&path).unwrap(), RedeliveryPolicy::default()).unwrap();
    assert_eq!(broker.depth("queue://q"), 1);
    let recovered = broker.dequeue("queue://q", Uuid::new_v4(), Utc::now()).unwrap();
    assert_eq!(text(&recovered), "durable");

    // new sends must not reuse recovered sequence numbers
    broker
        .enqueue(vec![(Destination::queue("q"), Envelope::new("next"))])
        .unwrap();
    assert_eq!(broker.depth("queue://q"), 1);
}

#[test]
fn test_acknowledged_durable_message_not_replayed() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let mut broker =
            Broker::new(Persistence::new(&path).unwrap(), RedeliveryPolicy::default()).unwrap();
        broker
            .enqueue(vec![(Destination::queue("q"), Envelope::new("done"))])
            .unwrap();
        let delivered = broker.dequeue("queue://q", Uuid::new_v4(), Utc::now()).unwrap();
        broker.acknowledge("queue://q", &delivered.id);
        broker.flush().unwrap();
    }

    let broker =
        Broker::new(Persistence::new(&path).unwrap(), RedeliveryPolicy::default()).unwrap();
    assert_eq!(broker.depth("queue://q"), 0);
}
