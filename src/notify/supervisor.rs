//! Multi-topic consumer supervisor
//!
//! Each topic gets a fetch loop and a dispatcher joined by a small bounded
//! channel. Topics never wait on each other: a topic whose fetch retries run
//! out stops alone and the others keep going.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::consumer::{KafkaSource, MessageSource};
use crate::broker::message::Message;
use crate::codec::NotificationMessage;
use crate::config::KafkaSettings;
use crate::notify::Broadcaster;
use crate::retry::{RetryStrategy, retry};
use crate::utils::{Error, Result};

const DISPATCH_BUFFER: usize = 10;

pub struct Supervisor {
    group_id: String,
    sources: Vec<Arc<dyn MessageSource>>,
    broadcaster: Arc<dyn Broadcaster>,
    fetch_strategy: RetryStrategy,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        group_id: impl Into<String>,
        sources: Vec<Arc<dyn MessageSource>>,
        broadcaster: Arc<dyn Broadcaster>,
        fetch_strategy: RetryStrategy,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            sources,
            broadcaster,
            fetch_strategy,
            cancel: None,
            tasks: Vec::new(),
        }
    }

    /// Builds one Kafka reader per configured topic, all in the configured group.
    pub fn connect_kafka(
        settings: &KafkaSettings,
        broadcaster: Arc<dyn Broadcaster>,
        fetch_strategy: RetryStrategy,
    ) -> Result<Self> {
        let sources = settings
            .topics
            .iter()
            .map(|topic| {
                KafkaSource::new(&settings.brokers, topic, &settings.group_id)
                    .map(|source| Arc::new(source) as Arc<dyn MessageSource>)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(
            settings.group_id.clone(),
            sources,
            broadcaster,
            fetch_strategy,
        ))
    }

    pub fn topics(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.topic()).collect()
    }

    /// Spawns the per-topic tasks and returns right away. Calling it again
    /// while running does nothing.
    pub fn start(&mut self, parent: &CancellationToken) {
        if self.cancel.is_some() {
            warn!(group_id = %self.group_id, "supervisor already started");
            return;
        }

        let cancel = parent.child_token();
        for source in &self.sources {
            let (tx, rx) = mpsc::channel(DISPATCH_BUFFER);
            self.tasks.push(tokio::spawn(fetch_loop(
                source.clone(),
                tx,
                self.fetch_strategy,
                cancel.clone(),
            )));
            self.tasks.push(tokio::spawn(dispatch_loop(
                source.clone(),
                rx,
                self.broadcaster.clone(),
                cancel.clone(),
            )));
        }
        self.cancel = Some(cancel);

        info!(
            group_id = %self.group_id,
            topics = ?self.topics(),
            "started consuming messages"
        );
    }

    /// Stops every loop and closes every reader. Returns the first close error.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!(error = %err, "consumer task panicked");
            }
        }

        let mut first_error = None;
        for source in &self.sources {
            if let Err(err) = source.close().await {
                error!(topic = %source.topic(), error = %err, "failed to close reader");
                first_error.get_or_insert(err);
            }
        }

        info!(group_id = %self.group_id, "stopped consuming messages");
        first_error.map_or(Ok(()), Err)
    }
}

async fn fetch_loop(
    source: Arc<dyn MessageSource>,
    tx: mpsc::Sender<Message>,
    strategy: RetryStrategy,
    cancel: CancellationToken,
) {
    loop {
        let message = match retry(strategy, &cancel, || source.fetch()).await {
            Ok(message) => message,
            Err(Error::Cancelled) => break,
            Err(err) => {
                error!(
                    topic = %source.topic(),
                    error = %err,
                    "fetch retries exhausted, consumer for topic stopped"
                );
                break;
            }
        };

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %message.key_str(),
            "received message"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(message) => if sent.is_err() {
                break;
            },
        }
    }
}

async fn dispatch_loop(
    source: Arc<dyn MessageSource>,
    mut rx: mpsc::Receiver<Message>,
    broadcaster: Arc<dyn Broadcaster>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match NotificationMessage::from_broker(&message) {
            Ok(notification) => {
                if let Err(err) = broadcaster.broadcast(&notification) {
                    // Left uncommitted so the record is delivered again.
                    error!(
                        topic = %message.topic,
                        offset = message.offset,
                        error = %err,
                        "error broadcasting message"
                    );
                    continue;
                }
            }
            Err(err) => warn!(
                topic = %message.topic,
                offset = message.offset,
                error = %err,
                "error decoding message, skipping"
            ),
        }

        if let Err(err) = source.commit(&message).await {
            error!(
                topic = %message.topic,
                offset = message.offset,
                error = %err,
                "error committing message"
            );
        }
    }
}
