use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::admin::{KafkaAdmin, TopicProvisioner};
use crate::config::Settings;
use crate::hub::{Registry, serve};
use crate::notify::supervisor::Supervisor;
use crate::utils::Result;

/// The running notification component: hub server, liveness sweep and
/// consumer supervisor sharing one registry.
pub struct NotificationService {
    registry: Registry,
    supervisor: Supervisor,
    listener: TcpListener,
    path: String,
}

impl NotificationService {
    pub fn new(
        registry: Registry,
        supervisor: Supervisor,
        listener: TcpListener,
        path: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            listener,
            path: path.into(),
        }
    }

    /// Wires the component to Kafka: provisions the configured topics, binds
    /// the hub listener and creates one reader per topic.
    pub async fn connect(settings: &Settings, cancel: &CancellationToken) -> Result<Self> {
        let admin = KafkaAdmin::new(&settings.kafka.brokers, settings.kafka.message_timeout())?;
        TopicProvisioner::new(admin)
            .ensure_topics(
                &settings.kafka.topic_specs(),
                settings.retry.provision.strategy(),
                cancel,
            )
            .await?;

        let registry = Registry::new(settings.hub.clone());
        let supervisor = Supervisor::connect_kafka(
            &settings.kafka,
            Arc::new(registry.clone()),
            settings.retry.fetch.strategy(),
        )?;

        let listener =
            TcpListener::bind((settings.server.host.as_str(), settings.server.port)).await?;

        Ok(Self::new(
            registry,
            supervisor,
            listener,
            settings.server.path.clone(),
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs until `cancel` fires, then shuts down: readers are stopped and
    /// closed, every client connection is closed, and the server and sweep
    /// tasks are awaited.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Self {
            registry,
            mut supervisor,
            listener,
            path,
        } = self;

        let sweep = registry.spawn_liveness_sweep(cancel.child_token());
        let server = tokio::spawn(serve(listener, registry.clone(), path, cancel.child_token()));
        supervisor.start(&cancel);

        info!("notification service running");
        cancel.cancelled().await;
        info!("shutting down notification service");

        let stopped = supervisor.stop().await;
        registry.close_all();

        match server.await {
            Ok(Err(err)) => error!(error = %err, "websocket hub failed"),
            Err(err) => error!(error = %err, "websocket hub task panicked"),
            Ok(Ok(())) => {}
        }
        if let Err(err) = sweep.await {
            error!(error = %err, "liveness sweep task panicked");
        }

        info!("notification service stopped");
        stopped
    }
}
