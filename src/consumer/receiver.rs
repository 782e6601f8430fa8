use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::Connection;
use crate::destination::{Destination, DestinationKind, DestinationRegistry};
use crate::message::{ConverterRegistry, Envelope};
use crate::utils::error::ReceiveError;

/// Blocking pull of single messages.
///
/// Every call runs on its own short-lived session with the timeout passed
/// in, so concurrent receives never share state and never join a
/// transaction opened elsewhere.
#[derive(Debug, Clone)]
pub struct SynchronousReceiver {
    connection: Connection,
    registry: Arc<DestinationRegistry>,
    converters: Arc<ConverterRegistry>,
}

impl SynchronousReceiver {
    pub fn new(
        connection: Connection,
        registry: Arc<DestinationRegistry>,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            connection,
            registry,
            converters,
        }
    }

    /// Waits up to `timeout` and removes the next message, or returns
    /// `None`. A zero timeout only looks at what is already queued.
    pub async fn receive(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ReceiveError> {
        let session = self.connection.create_session();
        let envelope = session.receive(destination, timeout).await?;
        match &envelope {
            Some(envelope) => debug!("Received {} from {destination}", envelope.id),
            None => debug!("Nothing on {destination} within {timeout:?}"),
        }
        Ok(envelope)
    }

    /// [`receive`](Self::receive) by logical destination name.
    pub async fn receive_from(&self, name: &str, timeout: Duration) -> Result<Option<Envelope>, ReceiveError> {
        let destination = self.registry.resolve(name);
        self.receive(&destination, timeout).await
    }

    /// Receives and decodes a structured payload.
    ///
    /// A queue message that cannot be decoded is dead-lettered rather than
    /// returned to the queue, since decoding would fail again.
    pub async fn receive_object<T: 'static>(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<Option<T>, ReceiveError> {
        if destination.kind() == DestinationKind::Topic {
            let Some(envelope) = self.receive(destination, timeout).await? else {
                return Ok(None);
            };
            return Ok(Some(self.converters.from_payload(&envelope.payload)?));
        }

        let session = self.connection.create_session();
        let queue = destination.address();
        let Some(envelope) = session.receive_from_queue(&queue, timeout).await? else {
            return Ok(None);
        };

        match self.converters.from_payload::<T>(&envelope.payload) {
            Ok(value) => {
                self.connection
                    .with_broker(|broker| broker.acknowledge(&queue, &envelope.id))?;
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Cannot decode message {} from {destination}: {e}", envelope.id);
                self.connection.with_broker_unchecked(|broker| {
                    broker.dead_letter(&queue, &envelope.id, &e.to_string())
                });
                Err(e.into())
            }
        }
    }
}
