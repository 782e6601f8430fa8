use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{DestinationSettings, ProducerSettings};
use crate::message::{Priority, Qos};
use crate::utils::error::MessagingError;

/// Queue: each message goes to exactly one consumer.
/// Topic: each subscriber group receives its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Queue,
    Topic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
}

impl Destination {
    pub fn new(name: &str, kind: DestinationKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn queue(name: &str) -> Self {
        Self::new(name, DestinationKind::Queue)
    }

    pub fn topic(name: &str) -> Self {
        Self::new(name, DestinationKind::Topic)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    /// Broker-side address, e.g. `queue://orders`.
    pub fn address(&self) -> String {
        let scheme = match self.kind {
            DestinationKind::Queue => "queue",
            DestinationKind::Topic => "topic",
        };
        format!("{scheme}://{}", self.name)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    destination: Destination,
    qos: Option<Qos>,
}

/// Logical destination names and their send defaults.
///
/// Names that were never registered resolve to a queue of the same name,
/// sent with the deployment-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct DestinationRegistry {
    entries: HashMap<String, Entry>,
    defaults: Qos,
}

impl DestinationRegistry {
    pub fn new(defaults: Qos) -> Self {
        Self {
            entries: HashMap::new(),
            defaults,
        }
    }

    /// Builds the registry from the `producer` and `destinations` config sections.
    pub fn from_settings(
        producer: &ProducerSettings,
        destinations: &[DestinationSettings],
    ) -> Result<Self, MessagingError> {
        let defaults = Qos::new(
            producer.delivery_mode,
            Priority::new(producer.default_priority)?,
            Duration::from_millis(producer.default_ttl_ms),
        );
        let mut registry = Self::new(defaults);

        for settings in destinations {
            let destination = Destination::new(&settings.name, settings.kind);
            let overridden = settings.delivery_mode.is_some()
                || settings.priority.is_some()
                || settings.ttl_ms.is_some();
            if overridden {
                let qos = Qos::new(
                    settings.delivery_mode.unwrap_or(defaults.delivery_mode),
                    match settings.priority {
                        Some(priority) => Priority::new(priority)?,
                        None => defaults.priority,
                    },
                    settings
                        .ttl_ms
                        .map_or(defaults.time_to_live, Duration::from_millis),
                );
                registry.register_with_qos(destination, qos);
            } else {
                registry.register(destination);
            }
        }

        Ok(registry)
    }

    pub fn register(&mut self, destination: Destination) -> &mut Self {
        self.entries.insert(
            destination.name().to_string(),
            Entry {
                destination,
                qos: None,
            },
        );
        self
    }

    pub fn register_with_qos(&mut self, destination: Destination, qos: Qos) -> &mut Self {
        self.entries.insert(
            destination.name().to_string(),
            Entry {
                destination,
                qos: Some(qos),
            },
        );
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&Destination> {
        self.entries.get(name).map(|entry| &entry.destination)
    }

    pub fn resolve(&self, name: &str) -> Destination {
        self.lookup(name)
            .cloned()
            .unwrap_or_else(|| Destination::queue(name))
    }

    pub fn default_qos(&self, name: &str) -> Qos {
        self.entries
            .get(name)
            .and_then(|entry| entry.qos)
            .unwrap_or(self.defaults)
    }

    pub fn deployment_defaults(&self) -> Qos {
        self.defaults
    }
}
