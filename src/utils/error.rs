//! The `error` module defines the error types surfaced by `ackline`.
//!
//! Connection and serialization failures propagate to the caller of a send
//! or receive. Commit failures force the transaction into the rolled-back
//! state. Processing errors are produced by listener callbacks and are
//! consumed by the dispatcher; they never reach unrelated code.

use thiserror::Error;

use crate::transaction::TransactionState;

/// The broker could not be reached, or refused the operation.
#[derive(Debug, Clone, Error)]
#[error("broker connection failed: {reason}")]
pub struct ConnectionError {
    pub reason: String,
}

impl ConnectionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new("connection is closed")
    }
}

impl From<sled::Error> for ConnectionError {
    fn from(err: sled::Error) -> Self {
        Self::new(format!("journal write failed: {err}"))
    }
}

/// A payload could not be encoded or decoded. Never retried.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("no converter registered for type {0}")]
    UnregisteredType(&'static str),

    #[error("no converter registered for type tag '{0}'")]
    UnknownTypeTag(String),

    #[error("payload has type tag '{found}', expected '{expected}'")]
    TypeMismatch { expected: String, found: String },

    #[error("payload is not a structured value")]
    NotStructured,

    #[error("json conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    Connection,
    Serialization,
}

/// Failure of a producer send. Nothing was enqueued.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl SendError {
    pub fn kind(&self) -> SendErrorKind {
        match self {
            SendError::Connection(_) => SendErrorKind::Connection,
            SendError::Serialization(_) => SendErrorKind::Serialization,
        }
    }
}

/// Failure of a synchronous receive. A timeout is not an error.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitErrorKind {
    BrokerRejected,
    NotOpen,
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// The broker refused the commit. The context is now rolled back and
    /// none of its operations took effect.
    #[error("broker rejected commit: {reason}")]
    BrokerRejected { reason: String },

    #[error("transaction is already {0:?}")]
    NotOpen(TransactionState),
}

impl CommitError {
    pub fn kind(&self) -> CommitErrorKind {
        match self {
            CommitError::BrokerRejected { .. } => CommitErrorKind::BrokerRejected,
            CommitError::NotOpen(_) => CommitErrorKind::NotOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextErrorKind {
    AlreadyOpen,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("a transaction is already open on this session")]
    AlreadyOpen,
}

impl ContextError {
    pub fn kind(&self) -> ContextErrorKind {
        match self {
            ContextError::AlreadyOpen => ContextErrorKind::AlreadyOpen,
        }
    }
}

/// Errors from [`crate::producer::Producer::send_transactional`].
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Failure reported by a listener callback.
///
/// A poison error marks the message as permanently unprocessable; it is
/// dead-lettered instead of redelivered.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
    pub poison: bool,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            poison: false,
        }
    }

    pub fn poison(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            poison: true,
        }
    }
}

impl From<SerializationError> for ProcessingError {
    fn from(err: SerializationError) -> Self {
        Self::poison(err.to_string())
    }
}

/// Setup-time errors: opening the messaging subsystem, building envelopes,
/// registering listeners.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("priority {0} is outside 0..=9")]
    InvalidPriority(u8),

    #[error("listener concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt journal entry: {0}")]
    Journal(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("dispatcher is already running")]
    AlreadyStarted,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
