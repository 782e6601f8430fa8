//! The `transaction` module implements local transactions: a unit of work
//! scoped to one session, committed or rolled back as a whole.

pub mod context;

pub use context::{Operation, TransactionContext, TransactionState};
