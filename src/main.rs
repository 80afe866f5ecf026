//! CLI for eventify-notify
//!
//! Subcommands:
//! - `serve`: run the notification component until Ctrl-C
//! - `publish`: publish one domain event, the way a domain service does after a write

use std::sync::Arc;

use clap::Parser;
use eventify_notify::broker::{
    EventKind, EventPublisher, KafkaAdmin, KafkaSink, TopicProvisioner, TopicSpec,
};
use eventify_notify::config::{Settings, load_config};
use eventify_notify::notify::NotificationService;
use eventify_notify::utils::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "eventify-notify")]
enum Command {
    /// Consume every event topic and push notifications to WebSocket subscribers
    Serve,
    /// Publish a single event
    Publish {
        /// Event kind, e.g. `review.created` (the topic name is accepted too)
        #[arg(long)]
        kind: EventKind,
        /// JSON payload of the event
        #[arg(long)]
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log_level);

    let result = match cmd {
        Command::Serve => run_server(settings).await,
        Command::Publish { kind, payload } => run_publish(settings, kind, &payload).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Exiting gracefully.");
        }
        shutdown.cancel();
    });

    let service = NotificationService::connect(&settings, &cancel).await?;
    service.run(cancel).await?;
    Ok(())
}

async fn run_publish(
    settings: Settings,
    kind: EventKind,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let cancel = CancellationToken::new();

    let admin = KafkaAdmin::new(&settings.kafka.brokers, settings.kafka.message_timeout())?;
    let spec = TopicSpec::new(
        kind.topic(),
        settings.kafka.partitions,
        settings.kafka.replication_factor,
    );
    TopicProvisioner::new(admin)
        .ensure_topic_with_retry(&spec, settings.retry.provision.strategy(), &cancel)
        .await?;

    let sink = KafkaSink::new(&settings.kafka.brokers, settings.kafka.message_timeout())?;
    let outbox = EventPublisher::start(
        Arc::new(sink),
        &[kind],
        settings.retry.publish.strategy(),
        settings.outbox.capacity,
        cancel,
    );

    outbox.publish(kind, &payload)?;
    outbox.shutdown().await;
    info!(kind = %kind, topic = kind.topic(), "event handed to the outbox and flushed");
    Ok(())
}
