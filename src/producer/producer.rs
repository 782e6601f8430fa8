use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{Connection, Session};
use crate::destination::{Destination, DestinationRegistry};
use crate::message::{ConverterRegistry, DeliveryMode, Envelope, MessageId, Payload, Priority, Qos};
use crate::transaction::TransactionContext;
use crate::utils::error::{ContextError, SendError, TransactionError};

/// Sends messages on its own session.
///
/// Every send is synchronous: when it returns `Ok` the message is enqueued
/// (and journaled, if durable). If a transaction is open on the producer's
/// session the send is held back until that transaction commits.
#[derive(Debug)]
pub struct Producer {
    session: Session,
    registry: Arc<DestinationRegistry>,
    converters: Arc<ConverterRegistry>,
}

impl Producer {
    pub fn new(
        connection: &Connection,
        registry: Arc<DestinationRegistry>,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            session: connection.create_session(),
            registry,
            converters,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Looks up a logical destination name.
    pub fn destination(&self, name: &str) -> Destination {
        self.registry.resolve(name)
    }

    /// Sends `envelope` with the QoS it already carries.
    ///
    /// The broker-assigned fields are stamped here: a fresh id, the send
    /// timestamp, and cleared redelivery metadata.
    pub fn send(&self, destination: &Destination, mut envelope: Envelope) -> Result<MessageId, SendError> {
        envelope.id = Uuid::new_v4();
        envelope.timestamp = Utc::now();
        envelope.redelivered = false;
        envelope.delivery_count = 0;

        let id = envelope.id;
        debug!(
            "Sending {id} to {destination} ({:?}, priority {})",
            envelope.delivery_mode,
            envelope.priority.value()
        );
        self.session.send(destination.clone(), envelope)?;
        Ok(id)
    }

    /// Sends with the destination's configured QoS, or the deployment
    /// defaults when it has none.
    pub fn send_with_default_qos(
        &self,
        destination: &Destination,
        payload: impl Into<Payload>,
    ) -> Result<MessageId, SendError> {
        let qos = self.registry.default_qos(destination.name());
        self.send_with(destination, payload.into(), qos)
    }

    /// Sends with an explicit QoS. A zero `time_to_live` never expires.
    pub fn send_with_qos(
        &self,
        destination: &Destination,
        payload: impl Into<Payload>,
        delivery_mode: DeliveryMode,
        priority: Priority,
        time_to_live: Duration,
    ) -> Result<MessageId, SendError> {
        let qos = Qos::new(delivery_mode, priority, time_to_live);
        self.send_with(destination, payload.into(), qos)
    }

    fn send_with(&self, destination: &Destination, payload: Payload, qos: Qos) -> Result<MessageId, SendError> {
        let mut envelope = Envelope::new(payload);
        qos.apply(&mut envelope, Utc::now());
        self.send(destination, envelope)
    }

    /// Sends text to the destination registered as `name`.
    pub fn send_text(&self, name: &str, text: &str) -> Result<MessageId, SendError> {
        let destination = self.registry.resolve(name);
        self.send_with_default_qos(&destination, text)
    }

    pub fn send_to_queue(&self, name: &str, payload: impl Into<Payload>) -> Result<MessageId, SendError> {
        self.send_with_default_qos(&Destination::queue(name), payload)
    }

    pub fn send_to_topic(&self, name: &str, payload: impl Into<Payload>) -> Result<MessageId, SendError> {
        self.send_with_default_qos(&Destination::topic(name), payload)
    }

    /// Converts `value` through the converter registry and sends it with
    /// the destination's default QoS. Nothing is sent if conversion fails.
    pub fn send_object<T: 'static>(&self, destination: &Destination, value: &T) -> Result<MessageId, SendError> {
        let payload = self.converters.to_payload(value)?;
        self.send_with_default_qos(destination, payload)
    }

    /// Opens a transaction on the producer's session.
    pub fn begin(&self) -> Result<TransactionContext, ContextError> {
        self.session.begin()
    }

    /// Sends every payload in one transaction and commits. On any failure
    /// the transaction rolls back and nothing is delivered.
    pub fn send_transactional(
        &self,
        destination: &Destination,
        payloads: Vec<Payload>,
    ) -> Result<Vec<MessageId>, TransactionError> {
        let mut tx = self.begin()?;
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            // an error drops `tx`, which rolls it back
            ids.push(self.send_with_default_qos(destination, payload)?);
        }
        tx.commit()?;
        info!("Committed {} messages to {destination}", ids.len());
        Ok(ids)
    }
}
