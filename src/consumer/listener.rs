use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use crate::client::Connection;
use crate::destination::Destination;
use crate::message::{ConverterRegistry, Envelope, MessageId};
use crate::transaction::Operation;
use crate::transaction::context::TransactionSlot;
use crate::utils::error::{ConnectionError, ProcessingError, SendError, SerializationError};

/// Callback invoked by the dispatcher for every delivered message.
///
/// Any `Fn(Delivery) -> impl Future<Output = Result<(), ProcessingError>>`
/// closure is a listener.
pub trait Listener: Send + Sync + 'static {
    fn on_message(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), ProcessingError>>;
}

impl<F, Fut> Listener for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    fn on_message(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), ProcessingError>> {
        self(delivery).boxed()
    }
}

/// A message handed to a listener.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub destination: Destination,
    /// Present only for CLIENT acknowledgement.
    pub ack: Option<AckHandle>,
    connection: Connection,
    transaction: Option<TransactionScope>,
    converters: Arc<ConverterRegistry>,
}

impl Delivery {
    pub(crate) fn new(
        envelope: Envelope,
        destination: Destination,
        connection: Connection,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            envelope,
            destination,
            ack: None,
            connection,
            transaction: None,
            converters,
        }
    }

    pub(crate) fn with_ack(mut self, ack: AckHandle) -> Self {
        self.ack = Some(ack);
        self
    }

    pub(crate) fn with_transaction(mut self, scope: TransactionScope) -> Self {
        self.transaction = Some(scope);
        self
    }

    /// Sends `envelope` as part of handling this message.
    ///
    /// Under TRANSACTED acknowledgement the send joins the transaction the
    /// delivery runs in: it becomes visible only if the listener succeeds
    /// and is discarded when the message is rolled back. Once that
    /// transaction has ended the send fails. In the other modes the message
    /// is enqueued immediately.
    pub fn send(&self, destination: &Destination, mut envelope: Envelope) -> Result<MessageId, SendError> {
        envelope.id = Uuid::new_v4();
        envelope.timestamp = Utc::now();
        envelope.redelivered = false;
        envelope.delivery_count = 0;

        let id = envelope.id;
        match &self.transaction {
            Some(scope) => scope.enlist(destination.clone(), envelope)?,
            None => self.connection.enqueue(destination.clone(), envelope)?,
        }
        debug!("Listener on {} sent {id} to {destination}", self.destination);
        Ok(id)
    }

    /// Decodes a structured payload. A failure converts into a poison
    /// [`ProcessingError`] with `?`.
    pub fn decode<T: 'static>(&self) -> Result<T, SerializationError> {
        self.converters.from_payload(&self.envelope.payload)
    }

    /// Acknowledges through the CLIENT handle. Does nothing in the other
    /// modes, where the dispatcher resolves the message itself.
    pub fn acknowledge(&self) -> Result<(), ConnectionError> {
        match &self.ack {
            Some(handle) => handle.acknowledge(),
            None => Ok(()),
        }
    }
}

/// The transaction a TRANSACTED delivery runs in. The dispatcher closes the
/// scope before it commits or rolls back, so a delivery that outlives its
/// transaction cannot enlist into the next one on the same session.
#[derive(Debug, Clone)]
pub(crate) struct TransactionScope {
    slot: TransactionSlot,
    open: Arc<AtomicBool>,
}

impl TransactionScope {
    pub(crate) fn new(slot: TransactionSlot) -> Self {
        Self {
            slot,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn enlist(&self, destination: Destination, envelope: Envelope) -> Result<(), ConnectionError> {
        let ended = || ConnectionError::new("the transaction for this delivery has ended");
        if !self.open.load(Ordering::SeqCst) {
            return Err(ended());
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let operations = slot.as_mut().ok_or_else(ended)?;
        debug!("Enlisted send of {} to {destination}", envelope.id);
        operations.push(Operation::Send {
            destination,
            envelope,
        });
        Ok(())
    }
}

/// Resolves one CLIENT-mode message. Clones share the same message; only
/// the first resolution takes effect.
#[derive(Debug, Clone)]
pub struct AckHandle {
    connection: Connection,
    queue: String,
    id: MessageId,
    resolved: Arc<AtomicBool>,
}

impl AckHandle {
    pub(crate) fn new(connection: Connection, queue: String, id: MessageId) -> Self {
        Self {
            connection,
            queue,
            id,
            resolved: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn acknowledge(&self) -> Result<(), ConnectionError> {
        self.resolve(|connection, queue, id| {
            connection.with_broker(|broker| broker.acknowledge(queue, id))
        })
    }

    /// Returns the message for redelivery.
    pub fn reject(&self) -> Result<(), ConnectionError> {
        let outcome = self.resolve(|connection, queue, id| {
            connection.with_broker(|broker| broker.redeliver(queue, id))
        });
        self.connection.wake_receivers();
        outcome
    }

    pub(crate) fn dead_letter(&self, reason: &str) -> Result<(), ConnectionError> {
        self.resolve(|connection, queue, id| {
            connection.with_broker(|broker| broker.dead_letter(queue, id, reason))
        })
    }

    /// True once the message was acknowledged, rejected or dead-lettered.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Fails when the broker no longer holds the message in flight for this
    /// session, e.g. after the session closed and the message was returned.
    fn resolve(
        &self,
        f: impl FnOnce(&Connection, &str, &MessageId) -> Result<bool, ConnectionError>,
    ) -> Result<(), ConnectionError> {
        if self.resolved.swap(true, Ordering::SeqCst) {
            debug!("Message {} already resolved", self.id);
            return Ok(());
        }
        match f(&self.connection, &self.queue, &self.id) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.resolved.store(false, Ordering::SeqCst);
                Err(ConnectionError::new(format!(
                    "message {} is no longer held by this session",
                    self.id
                )))
            }
            Err(e) => {
                self.resolved.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}
