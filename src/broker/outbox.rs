//! Fire-and-forget publishing for domain services.
//!
//! A CRUD handler calls [`EventPublisher::publish`] after its local write has
//! committed. The call only serializes the payload and enqueues it; a
//! background worker performs the broker write with retries. A failed
//! publish is logged and dropped, never rolled back against the local write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::events::EventKind;
use crate::broker::producer::{MessageSink, Publisher};
use crate::retry::RetryStrategy;
use crate::utils::{Error, Result};

#[derive(Debug)]
struct Outgoing {
    kind: EventKind,
    value: Vec<u8>,
}

pub struct EventPublisher {
    queue: mpsc::Sender<Outgoing>,
    worker: JoinHandle<()>,
}

impl EventPublisher {
    /// Creates one publisher per kind on top of `sink` and starts the worker.
    pub fn start(
        sink: Arc<dyn MessageSink>,
        kinds: &[EventKind],
        strategy: RetryStrategy,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let publishers = kinds
            .iter()
            .map(|kind| (*kind, Publisher::new(kind.topic(), sink.clone())))
            .collect();

        let (queue, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(rx, publishers, strategy, cancel));

        Self { queue, worker }
    }

    /// Enqueues `payload` for publication under `kind`. Never waits on the broker.
    pub fn publish<T: Serialize + ?Sized>(&self, kind: EventKind, payload: &T) -> Result<()> {
        let value = serde_json::to_vec(payload)?;

        match self.queue.try_send(Outgoing { kind, value }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(kind = %kind, "outbound queue full, dropping event");
                Err(Error::ResourceExhausted("outbound queue".into()))
            }
            Err(TrySendError::Closed(_)) => Err(Error::Closed("outbox")),
        }
    }

    /// Stops accepting events, waits for the queue to drain and closes the publishers.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(err) = self.worker.await {
            error!(error = %err, "outbox worker panicked");
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<Outgoing>,
    publishers: HashMap<EventKind, Publisher>,
    strategy: RetryStrategy,
    cancel: CancellationToken,
) {
    while let Some(outgoing) = rx.recv().await {
        let Some(publisher) = publishers.get(&outgoing.kind) else {
            warn!(kind = %outgoing.kind, "no publisher for event kind");
            continue;
        };

        let key = outgoing.kind.key().as_bytes();
        match publisher
            .send_with_retry(strategy, &cancel, key, &outgoing.value)
            .await
        {
            Ok(()) => info!(kind = %outgoing.kind, topic = %publisher.topic(), "event published"),
            Err(Error::Cancelled) => {
                warn!(kind = %outgoing.kind, "publishing cancelled, dropping remaining events");
                break;
            }
            Err(err) => error!(kind = %outgoing.kind, error = %err, "failed to publish event"),
        }
    }

    for publisher in publishers.values() {
        if let Err(err) = publisher.close().await {
            error!(topic = %publisher.topic(), error = %err, "failed to close publisher");
        }
    }
}
