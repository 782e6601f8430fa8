use serde::Deserialize;

use crate::consumer::AckMode;
use crate::destination::DestinationKind;
use crate::message::DeliveryMode;

/// Top-level configuration settings for the messaging subsystem.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub destinations: Vec<DestinationSettings>,
    pub listeners: Vec<ListenerSettings>,
    pub logging: LoggingSettings,
}

/// Connection and redelivery settings for the broker.
///
/// `max_redeliveries` of `None` redelivers without bound. Messages that
/// exhaust their redeliveries, or that a listener declares poison, go to
/// `dead_letter_queue` when one is set and are dropped otherwise.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub data_dir: String,
    pub in_memory: bool,
    pub max_redeliveries: Option<u32>,
    pub dead_letter_queue: Option<String>,
}

/// Deployment-wide send defaults. A ttl of 0 never expires.
#[derive(Debug, Deserialize, Clone)]
pub struct ProducerSettings {
    pub delivery_mode: DeliveryMode,
    pub default_priority: u8,
    pub default_ttl_ms: u64,
}

/// One named destination, optionally with its own send defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct DestinationSettings {
    pub name: String,
    #[serde(default)]
    pub kind: DestinationKind,
    pub delivery_mode: Option<DeliveryMode>,
    pub priority: Option<u8>,
    pub ttl_ms: Option<u64>,
}

/// Ack mode and worker count for the listener bound to `destination`.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerSettings {
    pub destination: String,
    #[serde(default)]
    pub ack_mode: AckMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub producer: Option<PartialProducerSettings>,
    pub destinations: Option<Vec<DestinationSettings>>,
    pub listeners: Option<Vec<ListenerSettings>>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub data_dir: Option<String>,
    pub in_memory: Option<bool>,
    pub max_redeliveries: Option<u32>,
    pub dead_letter_queue: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialProducerSettings {
    pub delivery_mode: Option<DeliveryMode>,
    pub default_priority: Option<u8>,
    pub default_ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                data_dir: "ackline_db".to_string(),
                in_memory: false,
                max_redeliveries: None,
                dead_letter_queue: None,
            },
            producer: ProducerSettings {
                delivery_mode: DeliveryMode::Transient,
                default_priority: 4,
                default_ttl_ms: 0,
            },
            destinations: Vec::new(),
            listeners: Vec::new(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
