//! Per-topic reader
//!
//! A [`MessageSource`] yields records of one topic in partition order and
//! commits offsets on request. Offsets are only ever committed explicitly,
//! so anything fetched but not committed is delivered again after a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::info;

use crate::broker::message::Message;
use crate::utils::{Error, Result};

#[async_trait]
pub trait MessageSource: Send + Sync {
    fn topic(&self) -> &str;

    /// Waits for the next record.
    async fn fetch(&self) -> Result<Message>;

    /// Acknowledges `message` and everything before it on its partition.
    async fn commit(&self, message: &Message) -> Result<()>;

    /// Stops reading. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

pub struct KafkaSource {
    topic: String,
    consumer: Arc<StreamConsumer>,
    closed: AtomicBool,
}

impl KafkaSource {
    pub fn new(brokers: &[String], topic: &str, group_id: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[topic])?;

        info!(brokers = ?brokers, topic, group_id, "connected to Kafka topic");
        Ok(Self {
            topic: topic.to_string(),
            consumer: Arc::new(consumer),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<Message> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("reader"));
        }

        let record = self.consumer.recv().await?;
        Ok(Message {
            topic: record.topic().to_string(),
            partition: record.partition(),
            offset: record.offset(),
            key: record.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: record.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            received_at: Utc::now(),
        })
    }

    async fn commit(&self, message: &Message) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        // The committed offset names the next record to read.
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;

        // A synchronous commit reports broker-side failures to the caller; it
        // blocks, so it runs off the async workers.
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|err| Error::transient(format!("commit task failed: {err}")))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.consumer.unsubscribe();
            info!(topic = %self.topic, "closed Kafka reader");
        }
        Ok(())
    }
}
