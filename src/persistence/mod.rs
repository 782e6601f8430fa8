//! The `persistence` module keeps durable messages across broker restarts.
//!
//! Durable envelopes are journaled in an embedded `sled` tree before a send
//! or commit returns, removed once acknowledged, expired or dead-lettered,
//! and replayed into their queues when a connection is opened.

pub mod sled_store;

pub use sled_store::{Persistence, StoredMessage};

#[cfg(test)]
mod tests;
