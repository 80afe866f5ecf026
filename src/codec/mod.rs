//! The `codec` module converts broker payloads into the notifications pushed
//! to subscribers.
//!
//! Payloads are handled as generic JSON: the pipeline never needs to know a
//! producer's schema, it only normalizes the value before wrapping it.

pub mod envelope;
pub mod notification;

pub use envelope::{decode, reencode};
pub use notification::NotificationMessage;

#[cfg(test)]
mod tests;
