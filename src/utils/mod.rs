//! The `utils` module holds the definitions shared by every other module:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;
