use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::error::MessagingError;

pub type MessageId = Uuid;

/// Whether the broker must keep a message across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Journaled before the send returns; survives a broker restart.
    #[default]
    #[serde(alias = "persistent")]
    Durable,
    /// Held in memory only; lost on restart.
    #[serde(alias = "non_persistent")]
    Transient,
}

/// Message priority, 0 (lowest) to 9 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(4);
    pub const HIGHEST: Priority = Priority(9);

    pub fn new(value: u8) -> Result<Self, MessagingError> {
        if value > Self::HIGHEST.0 {
            return Err(MessagingError::InvalidPriority(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = MessagingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Absolute deadline after which a message is dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Expiration {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl Expiration {
    /// Converts a time-to-live into a deadline relative to `now`.
    /// A zero ttl never expires.
    pub fn from_ttl(ttl: Duration, now: DateTime<Utc>) -> Self {
        if ttl.is_zero() {
            return Expiration::Never;
        }
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .map_or(Expiration::Never, Expiration::At)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Expiration::At(deadline) if *deadline <= now)
    }
}

/// Message body.
///
/// Structured values carry the type tag of the converter that produced them
/// so the receiving side can decode them without inspecting the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Structured { type_tag: String, bytes: Vec<u8> },
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn type_tag(&self) -> Option<&str> {
        match self {
            Payload::Structured { type_tag, .. } => Some(type_tag),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{text}"),
            Payload::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Payload::Structured { type_tag, bytes } => {
                write!(f, "<{type_tag}: {}>", String::from_utf8_lossy(bytes))
            }
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// Request/reply metadata. Carried unchanged, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub properties: BTreeMap<String, String>,
}

/// The unit exchanged with the broker.
///
/// `id` and `timestamp` are re-stamped by the producer at send time;
/// `redelivered` and `delivery_count` are maintained by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    pub payload: Payload,
    pub delivery_mode: DeliveryMode,
    pub priority: Priority,
    pub expiration: Expiration,
    pub correlation: CorrelationContext,
    pub timestamp: DateTime<Utc>,
    pub redelivered: bool,
    pub delivery_count: u32,
}

impl Envelope {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            delivery_mode: DeliveryMode::default(),
            priority: Priority::default(),
            expiration: Expiration::Never,
            correlation: CorrelationContext::default(),
            timestamp: Utc::now(),
            redelivered: false,
            delivery_count: 0,
        }
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, destination: impl Into<String>) -> Self {
        self.correlation.reply_to = Some(destination.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.correlation.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_expired_at(now)
    }
}
