//! Reliable publisher
//!
//! A [`Publisher`] is bound to one topic for its whole life. Writes go
//! through a [`MessageSink`]; the Kafka sink requires acknowledgement from
//! all in-sync replicas before a send counts as successful.
//!
//! `close` waits for sends that are already in flight, then flushes the
//! sink. Sends issued after `close` fail with `Error::Closed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::retry::{RetryStrategy, retry};
use crate::utils::{Error, Result};

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Blocks until everything handed to `send` has been delivered or failed.
    async fn flush(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaSink {
    pub fn new(brokers: &[String], timeout: Duration) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("acks", "all")
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()?;

        info!(brokers = ?brokers, "created Kafka producer");
        Ok(Self { producer, timeout })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(value);

        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _)| Error::from(err))?;

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|err| Error::transient(format!("flush task failed: {err}")))??;

        Ok(())
    }
}

pub struct Publisher {
    topic: String,
    sink: Arc<dyn MessageSink>,
    // `true` while open. Sends hold a read guard for their whole duration so
    // `close` (write guard) waits for them to drain.
    open: RwLock<bool>,
}

impl Publisher {
    pub fn new(topic: impl Into<String>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            topic: topic.into(),
            sink,
            open: RwLock::new(true),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn send(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let open = self.open.read().await;
        if !*open {
            return Err(Error::Closed("publisher"));
        }

        self.sink.send(&self.topic, key, value).await?;
        debug!(topic = %self.topic, key = %String::from_utf8_lossy(key), "message sent");
        Ok(())
    }

    pub async fn send_with_retry(
        &self,
        strategy: RetryStrategy,
        cancel: &CancellationToken,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        retry(strategy, cancel, || self.send(key, value)).await
    }

    /// Releases the publisher. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut open = self.open.write().await;
        if !*open {
            return Ok(());
        }
        *open = false;

        self.sink.flush().await?;
        info!(topic = %self.topic, "publisher closed");
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        !*self.open.read().await
    }
}
