//! Broker engine
//!
//! This module contains the embedded broker the client talks to. It is
//! responsible for:
//! - holding per-destination queues ordered by priority, then send order
//! - fanning topic messages out to every subscriber group
//! - tracking delivered-but-unresolved messages per session
//! - acknowledging, redelivering, expiring and dead-lettering messages
//! - journaling durable messages so they survive a restart
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to be held behind a lock by
//!   [`crate::client::Connection`]. Nothing here blocks or awaits, so the
//!   lock is never held across a suspension point.
//! - Every operation that takes effect is all-or-nothing: a batch is
//!   journaled before any queue is touched, so a journal failure leaves the
//!   broker unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::queue::{QueuedMessage, Queue, SessionId, Topic};
use crate::destination::{Destination, DestinationKind};
use crate::message::{DeliveryMode, Envelope, MessageId};
use crate::persistence::{Persistence, StoredMessage};
use crate::utils::error::{ConnectionError, MessagingError};

/// What happens to a message that keeps failing.
///
/// `max_redeliveries` of `None` redelivers without bound. A message that
/// exceeds the cap, or that a listener flags as poison, moves to
/// `dead_letter_queue`, or is dropped with a warning when none is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub max_redeliveries: Option<u32>,
    pub dead_letter_queue: Option<String>,
}

/// Counters describing how messages on a destination were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinationStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub redelivered: u64,
    pub expired: u64,
    pub dead_lettered: u64,
    /// Topic messages published while the topic had no subscriber group.
    pub unrouted: u64,
}

impl DestinationStats {
    fn merge(&mut self, other: &DestinationStats) {
        self.enqueued += other.enqueued;
        self.delivered += other.delivered;
        self.acknowledged += other.acknowledged;
        self.redelivered += other.redelivered;
        self.expired += other.expired;
        self.dead_lettered += other.dead_lettered;
        self.unrouted += other.unrouted;
    }
}

#[derive(Debug)]
pub struct Broker {
    queues: HashMap<String, Queue>,
    topics: HashMap<String, Topic>,
    stats: HashMap<String, DestinationStats>,
    persistence: Persistence,
    policy: RedeliveryPolicy,
    next_seq: u64,
}

/// Name of the queue backing subscriber `group` on `topic_address`.
pub fn group_queue_name(topic_address: &str, group: &str) -> String {
    format!("{topic_address}#{group}")
}

impl Broker {
    /// Creates a broker over `persistence`, replaying every journaled message
    /// into its queue.
    pub fn new(persistence: Persistence, policy: RedeliveryPolicy) -> Result<Self, MessagingError> {
        let mut broker = Self {
            queues: HashMap::new(),
            topics: HashMap::new(),
            stats: HashMap::new(),
            persistence,
            policy,
            next_seq: 0,
        };

        let stored = broker.persistence.load_messages()?;
        let recovered = stored.len();
        for (seq, StoredMessage { queue, envelope }) in stored {
            broker.next_seq = broker.next_seq.max(seq + 1);
            broker.queue_mut(&queue).push(QueuedMessage {
                seq,
                envelope,
                journaled: true,
            });
        }
        if recovered > 0 {
            info!("Recovered {recovered} durable messages from the journal");
        }

        Ok(broker)
    }

    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    fn queue_mut(&mut self, name: &str) -> &mut Queue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Queue::new(name))
    }

    fn stats_mut(&mut self, name: &str) -> &mut DestinationStats {
        self.stats.entry(name.to_string()).or_default()
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enqueues a batch of sends atomically: either every message becomes
    /// visible to consumers or none does.
    pub fn enqueue(&mut self, batch: Vec<(Destination, Envelope)>) -> Result<(), ConnectionError> {
        let mut staged: Vec<(String, QueuedMessage)> = Vec::new();
        let mut published: Vec<String> = Vec::new();
        let mut unrouted: Vec<String> = Vec::new();

        for (destination, envelope) in batch {
            let address = destination.address();
            match destination.kind() {
                DestinationKind::Queue => {
                    let journaled = envelope.delivery_mode == DeliveryMode::Durable;
                    let seq = self.allocate_seq();
                    staged.push((
                        address.clone(),
                        QueuedMessage {
                            seq,
                            envelope,
                            journaled,
                        },
                    ));
                }
                DestinationKind::Topic => {
                    let mut groups: Vec<String> = self
                        .topics
                        .get(&address)
                        .map(|topic| topic.groups.iter().cloned().collect())
                        .unwrap_or_default();
                    groups.sort();
                    if groups.is_empty() {
                        debug!("No subscriber groups on {address}; message not routed");
                        unrouted.push(address.clone());
                    }
                    for group in groups {
                        let seq = self.allocate_seq();
                        staged.push((
                            group_queue_name(&address, &group),
                            QueuedMessage {
                                seq,
                                envelope: envelope.clone(),
                                journaled: false,
                            },
                        ));
                    }
                }
            }
            published.push(address);
        }

        let journal: Vec<(u64, StoredMessage)> = staged
            .iter()
            .filter(|(_, message)| message.journaled)
            .map(|(queue, message)| {
                (
                    message.seq,
                    StoredMessage {
                        queue: queue.clone(),
                        envelope: message.envelope.clone(),
                    },
                )
            })
            .collect();
        self.persistence.store_batch(&journal)?;

        for (queue, message) in staged {
            self.queue_mut(&queue).push(message);
        }
        for address in published {
            self.stats_mut(&address).enqueued += 1;
        }
        for address in unrouted {
            self.stats_mut(&address).unrouted += 1;
        }

        Ok(())
    }

    /// Hands the next live message on `queue` to `session`.
    ///
    /// Messages whose expiration has passed are dropped on the way and never
    /// returned.
    pub fn dequeue(&mut self, queue: &str, session: SessionId, now: DateTime<Utc>) -> Option<Envelope> {
        loop {
            let mut message = self.queues.get_mut(queue)?.pop_ready()?;

            if message.envelope.is_expired_at(now) {
                debug!("Message {} on {queue} expired before delivery", message.envelope.id);
                self.forget(&message);
                self.stats_mut(queue).expired += 1;
                continue;
            }

            message.envelope.delivery_count += 1;
            let envelope = message.envelope.clone();
            self.queue_mut(queue).mark_in_flight(message, session);
            self.stats_mut(queue).delivered += 1;
            return Some(envelope);
        }
    }

    /// Resolves an in-flight message as ACKNOWLEDGED. Returns false when the
    /// message is not in flight on `queue` (already resolved or recovered).
    pub fn acknowledge(&mut self, queue: &str, id: &MessageId) -> bool {
        let Some(entry) = self.queues.get_mut(queue).and_then(|q| q.take_in_flight(id)) else {
            debug!("Acknowledgement for unknown message {id} on {queue}");
            return false;
        };
        self.forget(&entry.message);
        self.stats_mut(queue).acknowledged += 1;
        true
    }

    /// Resolves an in-flight message as REDELIVER_PENDING. Messages that
    /// have used up their redeliveries are dead-lettered instead.
    pub fn redeliver(&mut self, queue: &str, id: &MessageId) -> bool {
        let Some(entry) = self.queues.get_mut(queue).and_then(|q| q.take_in_flight(id)) else {
            return false;
        };
        let mut message = entry.message;

        if let Some(max) = self.policy.max_redeliveries {
            if message.envelope.delivery_count > max {
                let reason = format!("exceeded {max} redeliveries");
                self.move_to_dead_letter(queue, message, &reason);
                return true;
            }
        }

        message.envelope.redelivered = true;
        self.queue_mut(queue).push(message);
        self.stats_mut(queue).redelivered += 1;
        true
    }

    /// Removes an in-flight message from circulation without redelivery.
    pub fn dead_letter(&mut self, queue: &str, id: &MessageId, reason: &str) -> bool {
        let Some(entry) = self.queues.get_mut(queue).and_then(|q| q.take_in_flight(id)) else {
            return false;
        };
        self.move_to_dead_letter(queue, entry.message, reason);
        true
    }

    /// Moves `message` to the dead-letter queue. If the dead-letter copy
    /// cannot be written the original stays journaled and goes back on
    /// `queue` for redelivery.
    fn move_to_dead_letter(&mut self, queue: &str, mut message: QueuedMessage, reason: &str) {
        let Some(dlq) = self.policy.dead_letter_queue.clone() else {
            warn!(
                "Dropping message {} from {queue}: {reason} (no dead-letter queue configured)",
                message.envelope.id
            );
            self.forget(&message);
            self.stats_mut(queue).dead_lettered += 1;
            return;
        };

        let mut envelope = message.envelope.clone();
        envelope.redelivered = false;
        envelope.delivery_count = 0;
        envelope
            .correlation
            .properties
            .insert("dead_letter.origin".to_string(), queue.to_string());
        envelope
            .correlation
            .properties
            .insert("dead_letter.reason".to_string(), reason.to_string());

        warn!("Dead-lettering message {} from {queue} to {dlq}: {reason}", envelope.id);
        if let Err(e) = self.enqueue(vec![(Destination::queue(&dlq), envelope)]) {
            error!(
                "Failed to dead-letter message {} from {queue}, returning it to the queue: {e}",
                message.envelope.id
            );
            message.envelope.redelivered = true;
            self.queue_mut(queue).push(message);
            self.stats_mut(queue).redelivered += 1;
            return;
        }
        self.forget(&message);
        self.stats_mut(queue).dead_lettered += 1;
    }

    /// Returns every message `session` holds in flight to its queue, as if
    /// the session had been lost. Returns how many were recovered.
    pub fn recover_session(&mut self, session: &SessionId) -> usize {
        let pending: Vec<(String, MessageId)> = self
            .queues
            .iter()
            .flat_map(|(name, queue)| {
                queue
                    .in_flight_for(session)
                    .into_iter()
                    .map(move |id| (name.clone(), id))
            })
            .collect();

        let recovered = pending.len();
        for (queue, id) in pending {
            self.redeliver(&queue, &id);
        }
        if recovered > 0 {
            debug!("Recovered {recovered} unacknowledged messages from session {session}");
        }
        recovered
    }

    /// Adds subscriber `group` to a topic and returns the name of its queue.
    pub fn subscribe_group(&mut self, topic: &Destination, group: &str) -> String {
        let address = topic.address();
        self.topics
            .entry(address.clone())
            .or_insert_with(|| Topic::new(&address))
            .subscribe(group);
        let queue = group_queue_name(&address, group);
        self.queue_mut(&queue);
        queue
    }

    /// Removes subscriber `group`; messages still queued for it are discarded.
    pub fn unsubscribe_group(&mut self, topic: &Destination, group: &str) {
        let address = topic.address();
        if let Some(t) = self.topics.get_mut(&address) {
            t.unsubscribe(group);
        }
        self.queues.remove(&group_queue_name(&address, group));
    }

    /// Statistics for a queue address, or for a topic address summed over
    /// all of its subscriber groups.
    pub fn stats(&self, address: &str) -> DestinationStats {
        let group_prefix = format!("{address}#");
        let mut total = DestinationStats::default();
        for (name, stats) in &self.stats {
            if name == address || name.starts_with(&group_prefix) {
                total.merge(stats);
            }
        }
        total
    }

    /// Messages waiting for delivery on a physical queue.
    pub fn depth(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, Queue::ready_len)
    }

    pub fn in_flight(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, Queue::in_flight_len)
    }

    pub fn flush(&self) -> Result<(), ConnectionError> {
        self.persistence.flush()
    }

    fn forget(&self, message: &QueuedMessage) {
        if message.journaled {
            if let Err(e) = self.persistence.remove(message.seq) {
                warn!("Failed to remove message {} from journal: {e}", message.envelope.id);
            }
        }
    }
}
