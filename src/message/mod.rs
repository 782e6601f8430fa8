//! The `message` module defines what travels through the broker: the
//! [`Envelope`] with its delivery metadata, the [`Qos`] applied at send
//! time, and the [`ConverterRegistry`] that turns typed values into
//! structured payloads and back.

pub mod converter;
pub mod envelope;
pub mod order;
pub mod qos;

pub use converter::ConverterRegistry;
pub use envelope::{
    CorrelationContext, DeliveryMode, Envelope, Expiration, MessageId, Payload, Priority,
};
pub use order::Order;
pub use qos::Qos;

#[cfg(test)]
mod tests;
