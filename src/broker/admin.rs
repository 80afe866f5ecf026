//! Topic provisioning
//!
//! Topics are created once per process before any producer or consumer
//! touches them. Creation is idempotent: a topic that already exists counts
//! as success, which also covers two services racing to create the same
//! topic at startup. Controller discovery is left to the client library;
//! broker-reported error codes, not message text, decide what "already
//! exists" means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::message::TopicSpec;
use crate::retry::{RetryStrategy, retry};
use crate::utils::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Cluster operations needed to provision topics.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome>;
}

#[async_trait]
impl<T: TopicAdmin + ?Sized> TopicAdmin for Arc<T> {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        (**self).create_topic(spec).await
    }
}

pub struct KafkaAdmin {
    client: AdminClient<DefaultClientContext>,
    timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(brokers: &[String], timeout: Duration) -> Result<Self> {
        let client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .create()?;

        debug!(brokers = ?brokers, "created Kafka admin client");
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        let topic = NewTopic::new(
            &spec.name,
            spec.partitions as i32,
            TopicReplication::Fixed(spec.replication_factor as i32),
        );
        let options = AdminOptions::new()
            .operation_timeout(Some(self.timeout))
            .request_timeout(Some(self.timeout));

        let results = self.client.create_topics(&[topic], &options).await?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Ok(CreateOutcome::AlreadyExists);
                }
                Err((_, code)) => return Err(KafkaError::AdminOp(code).into()),
            }
        }

        Ok(CreateOutcome::Created)
    }
}

pub struct TopicProvisioner<A> {
    admin: A,
}

impl<A: TopicAdmin> TopicProvisioner<A> {
    pub fn new(admin: A) -> Self {
        Self { admin }
    }

    /// Makes sure `spec` exists on the cluster.
    pub async fn ensure_topic(&self, spec: &TopicSpec) -> Result<()> {
        match self.admin.create_topic(spec).await? {
            CreateOutcome::Created => info!(
                topic = %spec.name,
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "created topic"
            ),
            CreateOutcome::AlreadyExists => debug!(topic = %spec.name, "topic already exists"),
        }
        Ok(())
    }

    pub async fn ensure_topic_with_retry(
        &self,
        spec: &TopicSpec,
        strategy: RetryStrategy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        retry(strategy, cancel, || self.ensure_topic(spec)).await
    }

    /// Provisions every spec in order, stopping at the first failure.
    pub async fn ensure_topics(
        &self,
        specs: &[TopicSpec],
        strategy: RetryStrategy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for spec in specs {
            self.ensure_topic_with_retry(spec, strategy, cancel).await?;
        }
        Ok(())
    }
}
