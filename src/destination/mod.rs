//! The `destination` module maps the logical names application code uses
//! ("orderQueue", "demo-topic") to broker addresses, and records the
//! default quality of service each destination is sent with.

pub mod registry;

pub use registry::{Destination, DestinationKind, DestinationRegistry};
