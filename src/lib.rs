//! # ackline
//!
//! `ackline` is a messaging client with JMS-style delivery guarantees. It
//! sends and consumes messages under per-message quality of service
//! (durable or transient delivery, priority 0-9, expiration), acknowledges
//! them in AUTO, CLIENT or TRANSACTED mode, groups sends and receives into
//! local transactions, and offers a blocking receive with a timeout.
//!
//! The broker it talks to is embedded and in-process, journaling durable
//! messages to `sled` so they survive a restart.
//!
//! ## Core Modules
//!
//! - `message`: the envelope, its QoS metadata, and payload converters.
//! - `destination`: logical names mapped to queues and topics with default QoS.
//! - `producer`: plain, structured, QoS-overridden and transactional sends.
//! - `transaction`: local transaction contexts bound to a session.
//! - `consumer`: the listener dispatcher and the synchronous receiver.
//! - `client`: the broker connection handle and its sessions.
//! - `broker`: the embedded queue/topic engine.
//! - `persistence`: the durable message journal.
//! - `config`: settings loaded from file and environment.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod destination;
pub mod message;
pub mod messaging;
pub mod persistence;
pub mod producer;
pub mod transaction;
pub mod utils;

pub use messaging::Messaging;
