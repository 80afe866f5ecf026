//! The `broker` module is the client side of the message broker: topic
//! provisioning, the reliable publisher, per-topic readers and the event
//! outbox used by domain services.

pub mod admin;
pub mod consumer;
pub mod events;
pub mod message;
pub mod outbox;
pub mod producer;

pub use admin::{KafkaAdmin, TopicAdmin, TopicProvisioner};
pub use consumer::{KafkaSource, MessageSource};
pub use events::EventKind;
pub use message::{Message, TopicSpec};
pub use outbox::EventPublisher;
pub use producer::{KafkaSink, MessageSink, Publisher};
