//! The `utils` module provides the pieces shared across the `tidemq` crate:
//! the crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
