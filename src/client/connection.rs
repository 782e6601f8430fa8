use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::Session;
use crate::broker::{Broker, DestinationStats, RedeliveryPolicy, SessionId};
use crate::config::BrokerSettings;
use crate::destination::Destination;
use crate::message::Envelope;
use crate::persistence::Persistence;
use crate::utils::error::{ConnectionError, MessagingError};

struct Shared {
    broker: Mutex<Broker>,
    notify: Notify,
    closed: AtomicBool,
}

/// Handle to the broker.
///
/// Cloning is cheap and every clone talks to the same broker. The handle is
/// created once by the messaging subsystem and passed to whatever needs it;
/// stateful work happens on [`Session`]s created from it.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Opens the broker described by `settings`, replaying its journal.
    pub fn open(settings: &BrokerSettings) -> Result<Self, MessagingError> {
        let persistence = if settings.in_memory {
            Persistence::temporary()?
        } else {
            Persistence::new(&settings.data_dir)?
        };
        let policy = RedeliveryPolicy {
            max_redeliveries: settings.max_redeliveries,
            dead_letter_queue: settings.dead_letter_queue.clone(),
        };
        Self::with_persistence(persistence, policy)
    }

    /// A broker whose journal is discarded when the connection is dropped.
    pub fn in_memory() -> Result<Self, MessagingError> {
        Self::with_persistence(Persistence::temporary()?, RedeliveryPolicy::default())
    }

    pub fn with_persistence(
        persistence: Persistence,
        policy: RedeliveryPolicy,
    ) -> Result<Self, MessagingError> {
        let broker = Broker::new(persistence, policy)?;
        Ok(Self {
            shared: Arc::new(Shared {
                broker: Mutex::new(broker),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn create_session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Marks the connection unreachable. Every later send, receive, ack or
    /// commit fails with [`ConnectionError`]; blocked receivers wake up.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.lock().flush() {
            warn!("Failed to flush journal on close: {e}");
        }
        self.shared.notify.notify_waiters();
        info!("Broker connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Resolution counters for a destination.
    pub fn stats(&self, destination: &Destination) -> DestinationStats {
        self.lock().stats(&destination.address())
    }

    /// Messages waiting on a queue destination.
    pub fn queue_depth(&self, destination: &Destination) -> usize {
        self.lock().depth(&destination.address())
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        self.shared
            .broker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the broker, failing if the connection is closed.
    pub(crate) fn with_broker<R>(
        &self,
        f: impl FnOnce(&mut Broker) -> R,
    ) -> Result<R, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::closed());
        }
        Ok(f(&mut self.lock()))
    }

    /// Runs `f` even when the connection is closed. Used for the broker-side
    /// effects of losing a session: rollback and recovery.
    pub(crate) fn with_broker_unchecked<R>(&self, f: impl FnOnce(&mut Broker) -> R) -> R {
        f(&mut self.lock())
    }

    /// Enqueues one message outside any transaction and wakes receivers.
    pub(crate) fn enqueue(&self, destination: Destination, envelope: Envelope) -> Result<(), ConnectionError> {
        self.with_broker(|broker| broker.enqueue(vec![(destination, envelope)]))??;
        self.wake_receivers();
        Ok(())
    }

    pub(crate) fn wake_receivers(&self) {
        self.shared.notify.notify_waiters();
    }

    /// Waits up to `timeout` for a message on physical `queue` and hands it
    /// to `session` in flight. The caller resolves it.
    pub(crate) async fn receive_in_flight(
        &self,
        queue: &str,
        session: SessionId,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ConnectionError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // register interest before looking so a send in between is not missed
            notified.as_mut().enable();

            if let Some(envelope) =
                self.with_broker(|broker| broker.dequeue(queue, session, Utc::now()))?
            {
                return Ok(Some(envelope));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("No message on {queue} within {timeout:?}");
                return Ok(None);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .finish()
    }
}
