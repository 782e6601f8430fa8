//! The `client` module holds the application's side of the broker link.
//!
//! A [`Connection`] is the explicitly constructed handle to the broker,
//! owned by the messaging subsystem. [`Session`]s are cheap, per-caller
//! channels created from it; transactions and in-flight messages belong to
//! a session, never to the shared connection.

pub mod connection;
pub mod session;

pub use connection::Connection;
pub use session::Session;
