pub mod engine;
pub mod queue;

pub use engine::{Broker, DestinationStats, RedeliveryPolicy};
pub use queue::SessionId;

#[cfg(test)]
mod tests;
