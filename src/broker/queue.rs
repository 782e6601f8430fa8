use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::message::{Envelope, MessageId, Priority};

pub type SessionId = Uuid;

/// A message held by the broker together with its journal bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub seq: u64,
    pub envelope: Envelope,
    /// Whether the message has an entry in the durable journal.
    pub journaled: bool,
}

#[derive(Debug)]
pub struct InFlight {
    pub message: QueuedMessage,
    pub session: SessionId,
}

/// A physical queue: messages ready for delivery, ordered by priority
/// (highest first) and then by sequence number, plus the messages handed to
/// a session and not yet resolved.
#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    ready: BTreeMap<(Reverse<Priority>, u64), QueuedMessage>,
    in_flight: HashMap<MessageId, InFlight>,
}

impl Queue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: BTreeMap::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn push(&mut self, message: QueuedMessage) {
        let key = (Reverse(message.envelope.priority), message.seq);
        self.ready.insert(key, message);
    }

    pub fn pop_ready(&mut self) -> Option<QueuedMessage> {
        self.ready.pop_first().map(|(_, message)| message)
    }

    pub fn mark_in_flight(&mut self, message: QueuedMessage, session: SessionId) {
        self.in_flight
            .insert(message.envelope.id, InFlight { message, session });
    }

    pub fn take_in_flight(&mut self, id: &MessageId) -> Option<InFlight> {
        self.in_flight.remove(id)
    }

    pub fn in_flight_for(&self, session: &SessionId) -> Vec<MessageId> {
        self.in_flight
            .iter()
            .filter(|(_, entry)| entry.session == *session)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// A topic and its subscriber groups. Each group is backed by its own
/// queue and receives a copy of every message published after it joined.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub groups: HashSet<String>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: HashSet::new(),
        }
    }

    pub fn subscribe(&mut self, group: &str) {
        self.groups.insert(group.to_string());
    }

    pub fn unsubscribe(&mut self, group: &str) {
        self.groups.remove(group);
    }
}
