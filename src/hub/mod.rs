//! WebSocket broadcast hub.
//!
//! Subscribers connect over WebSocket and receive every notification; they
//! never send application data. See [`registry`] for the connection rules.

pub mod connection;
pub mod registry;
pub mod server;

pub use registry::{ClientHandle, ClientId, ConnectionState, Registry};
pub use server::serve;
