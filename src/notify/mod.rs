//! Notification component: consumes every event topic and pushes each record
//! to the connected WebSocket subscribers.

pub mod service;
pub mod supervisor;

pub use service::NotificationService;
pub use supervisor::Supervisor;

use crate::codec::NotificationMessage;
use crate::utils::Result;

/// Receiver of decoded notifications.
///
/// Must not block: the dispatcher commits the record's offset only once
/// `broadcast` has returned `Ok`.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: &NotificationMessage) -> Result<()>;
}

#[cfg(test)]
mod tests;
