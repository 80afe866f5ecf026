//! # eventify-notify
//!
//! `eventify-notify` is the event fan-out pipeline of the Eventify platform.
//! Domain services publish state changes (events, registrations, reviews) to
//! Kafka; the notification component consumes every event topic and pushes
//! each record to the WebSocket subscribers connected to its hub.
//!
//! ## Core Modules
//!
//! - `retry`: Bounded retries with exponential backoff, shared by every broker call.
//! - `broker`: Kafka access: topic provisioning, reliable publishing, per-topic readers
//!   and the fire-and-forget outbox used by domain services.
//! - `codec`: Decodes broker payloads and builds the notifications sent to clients.
//! - `hub`: The broadcast registry and the WebSocket server in front of it.
//! - `notify`: The multi-topic consumer supervisor and the service that wires it all up.
//! - `config`: Loads and merges the configuration.
//! - `utils`: Shared utilities, such as error handling and logging.

pub mod broker;
pub mod codec;
pub mod config;
pub mod hub;
pub mod notify;
pub mod retry;
pub mod utils;

#[cfg(test)]
mod testing;
