use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record read from (or destined for) a broker topic.
///
/// The key carries the event-type discriminator (for example
/// `review.created`); the value is an opaque JSON payload. `partition` and
/// `offset` locate the record for committing and are zero for records that
/// have not been read back from a broker yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: key.into(),
            value: value.into(),
            received_at: Utc::now(),
        }
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }
}

/// Topic layout requested from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}
