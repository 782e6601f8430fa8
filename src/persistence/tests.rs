use tempfile::tempdir;

use super::{Persistence, StoredMessage};
use crate::message::{DeliveryMode, Envelope};

fn stored(queue: &str, text: &str) -> StoredMessage {
    StoredMessage {
        queue: queue.to_string(),
        envelope: Envelope::new(text).with_delivery_mode(DeliveryMode::Durable),
    }
}

#[test]
fn test_store_and_load_message() {
    let persistence = Persistence::temporary().unwrap();
    persistence
        .store_batch(&[(1, stored("queue://orders", "hello"))])
        .unwrap();

    let messages = persistence.load_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 1);
    assert_eq!(messages[0].1.queue, "queue://orders");
    assert_eq!(messages[0].1.envelope.payload.as_text(), Some("hello"));
}

#[test]
fn test_load_preserves_sequence_order() {
    let persistence = Persistence::temporary().unwrap();
    persistence
        .store_batch(&[
            (300, stored("queue://q", "third")),
            (2, stored("queue://q", "first")),
            (41, stored("queue://q", "second")),
        ])
        .unwrap();

    let payloads: Vec<_> = persistence
        .load_messages()
        .unwrap()
        .into_iter()
        .map(|(_, m)| m.envelope.payload.as_text().unwrap().to_string())
        .collect();
    assert_eq!(payloads, vec!["first", "second", "third"]);
}

#[test]
fn test_remove_deletes_entry() {
    let persistence = Persistence::temporary().unwrap();
    persistence
        .store_batch(&[(1, stored("queue://q", "a")), (2, stored("queue://q", "b"))])
        .unwrap();

    persistence.remove(1).unwrap();
    let messages = persistence.load_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 2);
}

#[test]
fn test_empty_batch_is_noop() {
    let persistence = Persistence::temporary().unwrap();
    persistence.store_batch(&[]).unwrap();
    assert!(persistence.is_empty());
}

#[test]
fn test_messages_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let persistence = Persistence::new(&path).unwrap();
        persistence
            .store_batch(&[(7, stored("queue://durable", "kept"))])
            .unwrap();
    }

    let reopened = Persistence::new(&path).unwrap();
    let messages = reopened.load_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.envelope.payload.as_text(), Some("kept"));
}
