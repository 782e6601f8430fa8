use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::SessionId;
use crate::client::Connection;
use crate::destination::Destination;
use crate::message::{Envelope, MessageId};
use crate::utils::error::{CommitError, ConnectionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// One unit of work enlisted in a transaction.
#[derive(Debug, Clone)]
pub enum Operation {
    Send {
        destination: Destination,
        envelope: Envelope,
    },
    Receive {
        queue: String,
        id: MessageId,
    },
}

/// Operations enlisted on a session. `None` when no transaction is open.
pub(crate) type TransactionSlot = Arc<Mutex<Option<Vec<Operation>>>>;

/// A local transaction on one session.
///
/// While open, sends made through the session are held back and receives
/// stay unacknowledged. [`commit`](Self::commit) makes every send visible
/// and acknowledges every receive in one step; [`rollback`](Self::rollback)
/// discards the sends and returns the receives for redelivery. Dropping an
/// open context rolls it back.
#[derive(Debug)]
pub struct TransactionContext {
    id: Uuid,
    session: SessionId,
    connection: Connection,
    slot: TransactionSlot,
    state: TransactionState,
}

impl TransactionContext {
    pub(crate) fn open(connection: Connection, session: SessionId, slot: TransactionSlot) -> Self {
        let id = Uuid::new_v4();
        debug!("Transaction {id} opened on session {session}");
        Self {
            id,
            session,
            connection,
            slot,
            state: TransactionState::Open,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of operations enlisted so far.
    pub fn len(&self) -> usize {
        self.lock_slot().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn enlist_receive(&self, queue: &str, id: MessageId) {
        if let Some(operations) = self.lock_slot().as_mut() {
            operations.push(Operation::Receive {
                queue: queue.to_string(),
                id,
            });
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<Vec<Operation>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_operations(&self) -> Vec<Operation> {
        self.lock_slot().take().unwrap_or_default()
    }

    pub fn commit(&mut self) -> Result<(), CommitError> {
        if self.state != TransactionState::Open {
            return Err(CommitError::NotOpen(self.state));
        }

        let operations = self.take_operations();
        let (sends, receives) = split(operations);
        let send_count = sends.len();

        let outcome = self.connection.with_broker(|broker| {
            broker.enqueue(sends)?;
            for (queue, id) in &receives {
                broker.acknowledge(queue, id);
            }
            Ok::<_, ConnectionError>(())
        });

        match outcome.and_then(|result| result) {
            Ok(()) => {
                self.state = TransactionState::Committed;
                self.connection.wake_receivers();
                info!(
                    "Transaction {} committed ({send_count} sends, {} receives)",
                    self.id,
                    receives.len()
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                self.requeue(&receives, false);
                warn!("Transaction {} rejected by broker: {e}", self.id);
                Err(CommitError::BrokerRejected {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Discards enlisted sends and returns enlisted receives for
    /// redelivery. A no-op once the context is no longer open.
    pub fn rollback(&mut self) {
        self.finish_rollback(false);
    }

    /// Rolls back, but dead-letters enlisted receives instead of
    /// redelivering them.
    pub(crate) fn rollback_poisoned(&mut self) {
        self.finish_rollback(true);
    }

    fn finish_rollback(&mut self, poisoned: bool) {
        if self.state != TransactionState::Open {
            debug!("Transaction {} already {:?}; rollback ignored", self.id, self.state);
            return;
        }

        let (sends, receives) = split(self.take_operations());
        self.state = TransactionState::RolledBack;
        self.requeue(&receives, poisoned);
        info!(
            "Transaction {} rolled back ({} sends discarded, {} receives returned)",
            self.id,
            sends.len(),
            receives.len()
        );
    }

    fn requeue(&self, receives: &[(String, MessageId)], poisoned: bool) {
        if receives.is_empty() {
            return;
        }
        self.connection.with_broker_unchecked(|broker| {
            for (queue, id) in receives {
                if poisoned {
                    broker.dead_letter(queue, id, "listener reported a poison message");
                } else {
                    broker.redeliver(queue, id);
                }
            }
        });
        self.connection.wake_receivers();
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            warn!(
                "Transaction {} on session {} dropped while open; rolling back",
                self.id, self.session
            );
            self.rollback();
        }
    }
}

#[allow(clippy::type_complexity)]
fn split(operations: Vec<Operation>) -> (Vec<(Destination, Envelope)>, Vec<(String, MessageId)>) {
    let mut sends = Vec::new();
    let mut receives = Vec::new();
    for operation in operations {
        match operation {
            Operation::Send {
                destination,
                envelope,
            } => sends.push((destination, envelope)),
            Operation::Receive { queue, id } => receives.push((queue, id)),
        }
    }
    (sends, receives)
}
