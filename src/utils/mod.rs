//! The `utils` module holds the pieces every other module leans on:
//! the crate-wide error type and logging initialization.

pub mod error;
pub mod logging;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
