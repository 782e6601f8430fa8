//! The `consumer` module covers both ways of taking messages off the
//! broker: push delivery to registered [`Listener`]s through the
//! [`ConsumerDispatcher`], and pull delivery through the
//! [`SynchronousReceiver`].

use serde::Deserialize;

pub mod dispatcher;
pub mod listener;
pub mod receiver;

pub use dispatcher::ConsumerDispatcher;
pub use listener::{AckHandle, Delivery, Listener};
pub use receiver::SynchronousReceiver;

/// How a listener's messages are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Acknowledged when the callback succeeds, redelivered when it fails.
    #[default]
    Auto,
    /// The callback acknowledges through its [`AckHandle`].
    Client,
    /// Each message is processed in its own transaction.
    Transacted,
}
