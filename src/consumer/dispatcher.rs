//! Consumer dispatcher
//!
//! Runs the listener registrations. Each registration gets `concurrency`
//! worker tasks; every worker owns one session and loops:
//! - wait for the next message on the registration's queue (a topic
//!   registration reads its own subscriber-group queue)
//! - hand it to the listener, catching panics
//! - resolve it according to the registration's [`AckMode`]
//!
//! Listener failures never leave a worker. On shutdown each worker closes
//! its session, which returns any unresolved message for redelivery.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::AckMode;
use super::listener::{AckHandle, Delivery, Listener, TransactionScope};
use crate::client::{Connection, Session};
use crate::config::ListenerSettings;
use crate::destination::{Destination, DestinationKind, DestinationRegistry};
use crate::message::{ConverterRegistry, Envelope};
use crate::utils::error::{MessagingError, ProcessingError};

/// How long a worker waits for a message before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Registration {
    id: Uuid,
    destination: Destination,
    ack_mode: AckMode,
    concurrency: usize,
    listener: Arc<dyn Listener>,
    queue: Option<String>,
}

/// Everything one worker needs, shared by the workers of a registration.
struct Worker {
    connection: Connection,
    converters: Arc<ConverterRegistry>,
    destination: Destination,
    queue: String,
    ack_mode: AckMode,
    listener: Arc<dyn Listener>,
}

pub struct ConsumerDispatcher {
    connection: Connection,
    registry: Arc<DestinationRegistry>,
    converters: Arc<ConverterRegistry>,
    configured: Vec<ListenerSettings>,
    registrations: Vec<Registration>,
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ConsumerDispatcher {
    pub fn new(
        connection: Connection,
        registry: Arc<DestinationRegistry>,
        converters: Arc<ConverterRegistry>,
        configured: Vec<ListenerSettings>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connection,
            registry,
            converters,
            configured,
            registrations: Vec::new(),
            workers: Vec::new(),
            shutdown,
        }
    }

    /// Registers `listener` on `destination`. Takes effect at
    /// [`start`](Self::start); registering while running is an error.
    pub fn register_listener(
        &mut self,
        destination: Destination,
        ack_mode: AckMode,
        concurrency: usize,
        listener: impl Listener,
    ) -> Result<Uuid, MessagingError> {
        if concurrency == 0 {
            return Err(MessagingError::InvalidConcurrency);
        }
        if self.is_running() {
            return Err(MessagingError::AlreadyStarted);
        }

        let id = Uuid::new_v4();
        info!("Registered {ack_mode:?} listener {id} on {destination} (concurrency {concurrency})");
        self.registrations.push(Registration {
            id,
            destination,
            ack_mode,
            concurrency,
            listener: Arc::new(listener),
            queue: None,
        });
        Ok(id)
    }

    /// Registers `listener` on the destination named `name`, with the ack
    /// mode and concurrency from the `listeners` config section. Names with
    /// no listener settings use AUTO and one worker.
    pub fn register_configured(&mut self, name: &str, listener: impl Listener) -> Result<Uuid, MessagingError> {
        let (ack_mode, concurrency) = self
            .configured
            .iter()
            .find(|settings| settings.destination == name)
            .map_or((AckMode::default(), 1), |settings| {
                (settings.ack_mode, settings.concurrency)
            });
        let destination = self.registry.resolve(name);
        self.register_listener(destination, ack_mode, concurrency, listener)
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawns the workers of every registration. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self) -> Result<(), MessagingError> {
        if self.is_running() {
            return Err(MessagingError::AlreadyStarted);
        }
        self.shutdown.send_replace(false);

        for registration in &mut self.registrations {
            let queue = match registration.destination.kind() {
                DestinationKind::Queue => registration.destination.address(),
                DestinationKind::Topic => {
                    let group = registration.id.to_string();
                    self.connection.with_broker(|broker| {
                        broker.subscribe_group(&registration.destination, &group)
                    })?
                }
            };
            registration.queue = Some(queue.clone());

            let worker = Arc::new(Worker {
                connection: self.connection.clone(),
                converters: Arc::clone(&self.converters),
                destination: registration.destination.clone(),
                queue,
                ack_mode: registration.ack_mode,
                listener: Arc::clone(&registration.listener),
            });
            for index in 0..registration.concurrency {
                let worker = Arc::clone(&worker);
                let shutdown = self.shutdown.subscribe();
                self.workers
                    .push(tokio::spawn(run_worker(worker, index, shutdown)));
            }
        }

        info!(
            "Dispatcher started: {} registrations, {} workers",
            self.registrations.len(),
            self.workers.len()
        );
        Ok(())
    }

    /// Stops every worker and waits for in-progress callbacks to finish.
    /// Unresolved messages go back to their queues.
    pub async fn shutdown(&mut self) {
        if !self.is_running() {
            return;
        }
        self.shutdown.send_replace(true);

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Dispatcher worker ended abnormally: {e}");
            }
        }

        for registration in &mut self.registrations {
            if registration.destination.kind() == DestinationKind::Topic && registration.queue.is_some() {
                let group = registration.id.to_string();
                self.connection.with_broker_unchecked(|broker| {
                    broker.unsubscribe_group(&registration.destination, &group)
                });
            }
            registration.queue = None;
        }
        info!("Dispatcher stopped");
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown.send_replace(true);
        }
    }
}

async fn run_worker(worker: Arc<Worker>, index: usize, mut shutdown: watch::Receiver<bool>) {
    let session = worker.connection.create_session();
    debug!("Worker {index} on {} started", worker.queue);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = session.receive_from_queue(&worker.queue, POLL_INTERVAL) => received,
        };

        match received {
            Ok(Some(envelope)) => worker.process(&session, envelope).await,
            Ok(None) => {}
            Err(e) => {
                warn!("Worker {index} on {} stopping: {e}", worker.queue);
                break;
            }
        }
    }

    let returned = session.recover();
    debug!("Worker {index} on {} stopped ({returned} messages returned)", worker.queue);
}

impl Worker {
    async fn process(&self, session: &Session, envelope: Envelope) {
        let id = envelope.id;
        match self.ack_mode {
            AckMode::Auto => {
                let delivery = self.delivery(envelope);
                let outcome = self.invoke(delivery).await;
                let resolved = self.connection.with_broker(|broker| match &outcome {
                    Ok(()) => broker.acknowledge(&self.queue, &id),
                    Err(e) if e.poison => broker.dead_letter(&self.queue, &id, &e.message),
                    Err(_) => broker.redeliver(&self.queue, &id),
                });
                if let Err(e) = resolved {
                    warn!("Could not resolve message {id}: {e}");
                }
                if outcome.is_err() {
                    self.connection.wake_receivers();
                }
            }
            AckMode::Client => {
                let handle = AckHandle::new(self.connection.clone(), self.queue.clone(), id);
                let delivery = self.delivery(envelope).with_ack(handle.clone());
                let outcome = self.invoke(delivery).await;
                match outcome {
                    Err(e) if e.poison => {
                        if let Err(err) = handle.dead_letter(&e.message) {
                            warn!("Could not dead-letter message {id}: {err}");
                        }
                    }
                    Err(_) if !handle.is_resolved() => {
                        debug!("Message {id} left unacknowledged until its session closes");
                    }
                    _ => {}
                }
            }
            AckMode::Transacted => {
                let mut tx = match session.begin() {
                    Ok(tx) => tx,
                    Err(e) => {
                        error!("Cannot open transaction for message {id}: {e}");
                        return;
                    }
                };
                tx.enlist_receive(&self.queue, id);
                let scope = TransactionScope::new(session.transaction_slot());
                let delivery = self.delivery(envelope).with_transaction(scope.clone());
                let outcome = self.invoke(delivery).await;
                scope.close();
                match outcome {
                    Ok(()) => {
                        if let Err(e) = tx.commit() {
                            warn!("Commit for message {id} failed: {e}");
                        }
                    }
                    Err(e) if e.poison => tx.rollback_poisoned(),
                    Err(_) => tx.rollback(),
                }
            }
        }
    }

    fn delivery(&self, envelope: Envelope) -> Delivery {
        Delivery::new(
            envelope,
            self.destination.clone(),
            self.connection.clone(),
            Arc::clone(&self.converters),
        )
    }

    async fn invoke(&self, delivery: Delivery) -> Result<(), ProcessingError> {
        let id = delivery.envelope.id;
        let listener = Arc::clone(&self.listener);

        let outcome = AssertUnwindSafe(async move { listener.on_message(delivery).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ProcessingError::new(format!(
                    "listener panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        if let Err(e) = &outcome {
            warn!("Listener on {} failed for message {id}: {e}", self.destination);
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
