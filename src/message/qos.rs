use std::time::Duration;

use chrono::{DateTime, Utc};

use super::envelope::{DeliveryMode, Envelope, Expiration, Priority};

/// Delivery settings applied to an envelope when it is sent.
///
/// `time_to_live` is relative; it becomes an absolute [`Expiration`] at the
/// moment of sending. `Duration::ZERO` means the message never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qos {
    pub delivery_mode: DeliveryMode,
    pub priority: Priority,
    pub time_to_live: Duration,
}

impl Qos {
    pub fn new(delivery_mode: DeliveryMode, priority: Priority, time_to_live: Duration) -> Self {
        Self {
            delivery_mode,
            priority,
            time_to_live,
        }
    }

    pub fn apply(&self, envelope: &mut Envelope, now: DateTime<Utc>) {
        envelope.delivery_mode = self.delivery_mode;
        envelope.priority = self.priority;
        envelope.expiration = Expiration::from_ttl(self.time_to_live, now);
    }
}
