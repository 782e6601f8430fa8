use std::time::Duration;

use chrono::Utc;

use super::*;
use crate::utils::error::{MessagingError, SerializationError};

#[test]
fn test_priority_bounds() {
    assert_eq!(Priority::new(0).unwrap(), Priority::LOWEST);
    assert_eq!(Priority::new(9).unwrap(), Priority::HIGHEST);
    assert!(matches!(
        Priority::new(10),
        Err(MessagingError::InvalidPriority(10))
    ));
    assert_eq!(Priority::default().value(), 4);
}

#[test]
fn test_priority_rejected_when_deserializing() {
    let parsed: Result<Priority, _> = serde_json::from_str("12");
    assert!(parsed.is_err());
    let parsed: Priority = serde_json::from_str("7").unwrap();
    assert_eq!(parsed.value(), 7);
}

#[test]
fn test_zero_ttl_never_expires() {
    let now = Utc::now();
    assert_eq!(Expiration::from_ttl(Duration::ZERO, now), Expiration::Never);
    assert!(!Expiration::Never.is_expired_at(now + chrono::Duration::days(3650)));
}

#[test]
fn test_ttl_becomes_absolute_deadline() {
    let now = Utc::now();
    let expiration = Expiration::from_ttl(Duration::from_millis(60_000), now);
    assert_eq!(
        expiration,
        Expiration::At(now + chrono::Duration::milliseconds(60_000))
    );
    assert!(!expiration.is_expired_at(now));
    assert!(expiration.is_expired_at(now + chrono::Duration::seconds(61)));
}

#[test]
fn test_qos_apply_stamps_expiration_from_send_time() {
    let now = Utc::now();
    let mut envelope = Envelope::new("hello");
    let qos = Qos::new(
        DeliveryMode::Transient,
        Priority::HIGHEST,
        Duration::from_secs(5),
    );
    qos.apply(&mut envelope, now);

    assert_eq!(envelope.delivery_mode, DeliveryMode::Transient);
    assert_eq!(envelope.priority, Priority::HIGHEST);
    assert_eq!(
        envelope.expiration,
        Expiration::At(now + chrono::Duration::seconds(5))
    );
}

#[test]
fn test_envelope_builders_carry_correlation() {
    let envelope = Envelope::new("ping")
        .with_correlation_id("c-1")
        .with_reply_to("replies")
        .with_property("source", "test");

    assert_eq!(envelope.payload.as_text(), Some("ping"));
    assert_eq!(envelope.correlation.correlation_id.as_deref(), Some("c-1"));
    assert_eq!(envelope.correlation.reply_to.as_deref(), Some("replies"));
    assert_eq!(envelope.correlation.properties["source"], "test");
}

#[test]
fn test_delivery_mode_accepts_jms_names() {
    let mode: DeliveryMode = serde_json::from_str("\"persistent\"").unwrap();
    assert_eq!(mode, DeliveryMode::Durable);
    let mode: DeliveryMode = serde_json::from_str("\"non_persistent\"").unwrap();
    assert_eq!(mode, DeliveryMode::Transient);
}

#[test]
fn test_converter_round_trips_registered_type() {
    let mut converters = ConverterRegistry::new();
    converters.register::<Order>(Order::TYPE_TAG);

    let order = Order::new("ORDER-1001", "Gaming PC", 1, 1500.0);
    let payload = converters.to_payload(&order).unwrap();
    assert_eq!(payload.type_tag(), Some("order"));

    let decoded: Order = converters.from_payload(&payload).unwrap();
    assert_eq!(decoded, order);
}

#[test]
fn test_converter_rejects_unregistered_type() {
    let converters = ConverterRegistry::new();
    let order = Order::new("ORDER-1", "Desk", 2, 99.5);
    assert!(matches!(
        converters.to_payload(&order),
        Err(SerializationError::UnregisteredType(_))
    ));
}

#[test]
fn test_converter_tag_taken_over_by_another_type() {
    let mut converters = ConverterRegistry::new();
    converters.register::<Order>("shared");
    converters.register::<String>("shared");

    assert_eq!(converters.tag_of::<Order>(), None);
    assert_eq!(converters.tag_of::<String>(), Some("shared"));

    let order = Order::new("ORDER-2", "Chair", 1, 80.0);
    assert!(matches!(
        converters.to_payload(&order),
        Err(SerializationError::UnregisteredType(_))
    ));
    let payload = converters.to_payload(&"hi".to_string()).unwrap();
    let decoded: String = converters.from_payload(&payload).unwrap();
    assert_eq!(decoded, "hi");
}

#[test]
fn test_converter_rejects_unknown_tag_and_plain_text() {
    let mut converters = ConverterRegistry::new();
    converters.register::<Order>(Order::TYPE_TAG);

    let foreign = Payload::Structured {
        type_tag: "invoice".to_string(),
        bytes: b"{}".to_vec(),
    };
    assert!(matches!(
        converters.from_payload::<Order>(&foreign),
        Err(SerializationError::UnknownTypeTag(tag)) if tag == "invoice"
    ));
    assert!(matches!(
        converters.from_payload::<Order>(&Payload::from("plain")),
        Err(SerializationError::NotStructured)
    ));
}

#[test]
fn test_converter_detects_tag_mismatch() {
    let mut converters = ConverterRegistry::new();
    converters
        .register::<Order>(Order::TYPE_TAG)
        .register::<Vec<String>>("tags");

    let payload = converters.to_payload(&vec!["a".to_string()]).unwrap();
    assert!(matches!(
        converters.from_payload::<Order>(&payload),
        Err(SerializationError::TypeMismatch { .. })
    ));
}

#[test]
fn test_converter_surfaces_malformed_json() {
    let mut converters = ConverterRegistry::new();
    converters.register::<Order>(Order::TYPE_TAG);

    let broken = Payload::Structured {
        type_tag: Order::TYPE_TAG.to_string(),
        bytes: b"{not json".to_vec(),
    };
    assert!(matches!(
        converters.from_payload::<Order>(&broken),
        Err(SerializationError::Json(_))
    ));
}

#[test]
fn test_order_uses_camel_case_fields() {
    let order = Order::new("ORDER-7", "Chair", 3, 45.0);
    let json = serde_json::to_value(&order).unwrap();
    assert_eq!(json["orderId"], "ORDER-7");
    assert_eq!(json["quantity"], 3);
}
