use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::connection::Connection;
use crate::broker::SessionId;
use crate::destination::{Destination, DestinationKind};
use crate::message::Envelope;
use crate::transaction::context::TransactionSlot;
use crate::transaction::{Operation, TransactionContext};
use crate::utils::error::{ConnectionError, ContextError};

/// A single-owner channel of work on a [`Connection`].
///
/// Sessions are not shared between callers: each producer, each dispatcher
/// worker and each synchronous receive gets its own. A session carries at
/// most one open transaction and owns the messages it has received but not
/// yet resolved; closing or dropping it returns those for redelivery.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    connection: Connection,
    transaction: TransactionSlot,
}

impl Session {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            transaction: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Opens a transaction on this session. Fails if one is already open.
    pub fn begin(&self) -> Result<TransactionContext, ContextError> {
        let mut slot = self
            .transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ContextError::AlreadyOpen);
        }
        *slot = Some(Vec::new());
        drop(slot);

        Ok(TransactionContext::open(
            self.connection.clone(),
            self.id,
            Arc::clone(&self.transaction),
        ))
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Enqueues `envelope`, or enlists it when a transaction is open.
    pub(crate) fn send(
        &self,
        destination: Destination,
        envelope: Envelope,
    ) -> Result<(), ConnectionError> {
        if self.connection.is_closed() {
            return Err(ConnectionError::closed());
        }

        {
            let mut slot = self
                .transaction
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(operations) = slot.as_mut() {
                debug!("Enlisted send of {} to {destination}", envelope.id);
                operations.push(Operation::Send {
                    destination,
                    envelope,
                });
                return Ok(());
            }
        }

        self.connection.enqueue(destination, envelope)
    }

    pub(crate) fn transaction_slot(&self) -> TransactionSlot {
        Arc::clone(&self.transaction)
    }

    /// Waits up to `timeout` for the next message on `destination`.
    ///
    /// Inside a transaction a queue receive is enlisted and acknowledged at
    /// commit; otherwise it is acknowledged before returning.
    ///
    /// Receiving from a topic only sees messages published while the call is
    /// waiting. Its subscriber group is torn down before returning, so a
    /// topic receive is always acknowledged immediately and never enlisted,
    /// even inside a transaction.
    pub async fn receive(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ConnectionError> {
        let (queue, temporary_group) = match destination.kind() {
            DestinationKind::Queue => (destination.address(), None),
            DestinationKind::Topic => {
                let group = format!("receive-{}", self.id);
                let queue = self
                    .connection
                    .with_broker(|broker| broker.subscribe_group(destination, &group))?;
                (queue, Some(group))
            }
        };

        let received = self.receive_from_queue(&queue, timeout).await;

        if let Some(group) = temporary_group {
            self.connection.with_broker_unchecked(|broker| {
                if let Ok(Some(envelope)) = &received {
                    broker.acknowledge(&queue, &envelope.id);
                }
                broker.unsubscribe_group(destination, &group);
            });
            return received;
        }

        let Some(envelope) = received? else {
            return Ok(None);
        };

        let enlisted = {
            let mut slot = self
                .transaction
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_mut() {
                Some(operations) => {
                    operations.push(Operation::Receive {
                        queue: queue.clone(),
                        id: envelope.id,
                    });
                    true
                }
                None => false,
            }
        };
        if !enlisted {
            self.connection
                .with_broker(|broker| broker.acknowledge(&queue, &envelope.id))?;
        }

        Ok(Some(envelope))
    }

    /// Waits for a message on a physical queue and leaves it in flight on
    /// this session; the caller must acknowledge, redeliver or dead-letter it.
    pub(crate) async fn receive_from_queue(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ConnectionError> {
        self.connection
            .receive_in_flight(queue, self.id, timeout)
            .await
    }

    /// Returns every unresolved message this session holds for
    /// redelivery. Returns how many were returned.
    pub fn recover(&self) -> usize {
        let recovered = self
            .connection
            .with_broker_unchecked(|broker| broker.recover_session(&self.id));
        if recovered > 0 {
            self.connection.wake_receivers();
        }
        recovered
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.recover();
    }
}
