use std::sync::Arc;

use tracing::info;

use crate::broker::DestinationStats;
use crate::client::Connection;
use crate::config::Settings;
use crate::consumer::{ConsumerDispatcher, SynchronousReceiver};
use crate::destination::DestinationRegistry;
use crate::message::ConverterRegistry;
use crate::producer::Producer;
use crate::utils::error::MessagingError;

/// The messaging subsystem: one broker connection plus the registries
/// every producer and consumer built from it shares.
#[derive(Debug, Clone)]
pub struct Messaging {
    connection: Connection,
    registry: Arc<DestinationRegistry>,
    converters: Arc<ConverterRegistry>,
    settings: Settings,
}

impl Messaging {
    /// Opens the broker connection and builds the destination registry
    /// from `settings`.
    pub fn open(settings: Settings, converters: ConverterRegistry) -> Result<Self, MessagingError> {
        let registry = DestinationRegistry::from_settings(&settings.producer, &settings.destinations)?;
        let connection = Connection::open(&settings.broker)?;
        info!(
            "Messaging opened ({} destinations, {} listener settings)",
            settings.destinations.len(),
            settings.listeners.len()
        );

        Ok(Self {
            connection,
            registry: Arc::new(registry),
            converters: Arc::new(converters),
            settings,
        })
    }

    /// A producer on a fresh session.
    pub fn producer(&self) -> Producer {
        Producer::new(&self.connection, Arc::clone(&self.registry), Arc::clone(&self.converters))
    }

    pub fn receiver(&self) -> SynchronousReceiver {
        SynchronousReceiver::new(
            self.connection.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.converters),
        )
    }

    /// A dispatcher that knows the configured listener settings.
    pub fn dispatcher(&self) -> ConsumerDispatcher {
        ConsumerDispatcher::new(
            self.connection.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.converters),
            self.settings.listeners.clone(),
        )
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Statistics for the destination registered as `name`.
    pub fn stats(&self, name: &str) -> DestinationStats {
        self.connection.stats(&self.registry.resolve(name))
    }

    pub fn close(&self) {
        self.connection.close();
    }
}
