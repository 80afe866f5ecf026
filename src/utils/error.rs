//! Crate-wide error type.
//!
//! Errors are classified the way the pipeline reacts to them:
//! - `Transient`: worth retrying (broker unreachable, timeouts)
//! - `Permanent`: retrying cannot help (malformed envelope, rejected request)
//! - `ResourceExhausted`: a bounded queue is full
//! - `Cancelled`: the caller asked us to stop; never retried
//!
//! Only `Transient` errors are retried by [`crate::retry::retry`].

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Whether a retry loop may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<KafkaError> for Error {
    fn from(err: KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(
                RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::InvalidTopic
                | RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidReplicationFactor
                | RDKafkaErrorCode::InvalidPartitions,
            ) => Self::Permanent(err.to_string()),
            _ => match err {
                KafkaError::ClientCreation(msg) => Self::Permanent(msg),
                other => Self::Transient(other.to_string()),
            },
        }
    }
}
