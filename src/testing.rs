//! In-memory stand-ins for the broker seams, shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::admin::{CreateOutcome, TopicAdmin};
use crate::broker::consumer::MessageSource;
use crate::broker::message::{Message, TopicSpec};
use crate::broker::producer::MessageSink;
use crate::codec::NotificationMessage;
use crate::notify::Broadcaster;
use crate::utils::{Error, Result};

/// Topic-per-channel broker. Records sent through the [`MessageSink`] impl
/// come out of the matching [`MemorySource`] with increasing offsets.
pub struct MemoryBroker {
    feeds: HashMap<String, mpsc::UnboundedSender<Message>>,
    receivers: Mutex<HashMap<String, mpsc::UnboundedReceiver<Message>>>,
    next_offset: AtomicI64,
    sent: Mutex<Vec<Message>>,
    send_attempts: AtomicU32,
    failing_sends: AtomicU32,
    send_delay: Mutex<Option<Duration>>,
    flushes: AtomicU32,
}

impl MemoryBroker {
    pub fn new(topics: &[&str]) -> Arc<Self> {
        let mut feeds = HashMap::new();
        let mut receivers = HashMap::new();
        for topic in topics {
            let (tx, rx) = mpsc::unbounded_channel();
            feeds.insert(topic.to_string(), tx);
            receivers.insert(topic.to_string(), rx);
        }

        Arc::new(Self {
            feeds,
            receivers: Mutex::new(receivers),
            next_offset: AtomicI64::new(0),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicU32::new(0),
            failing_sends: AtomicU32::new(0),
            send_delay: Mutex::new(None),
            flushes: AtomicU32::new(0),
        })
    }

    /// Hands out the reader for `topic`. Each topic has exactly one.
    pub fn source(&self, topic: &str) -> Arc<MemorySource> {
        let rx = self
            .receivers
            .lock()
            .unwrap()
            .remove(topic)
            .expect("source already taken or unknown topic");
        Arc::new(MemorySource::new(topic, rx))
    }

    /// Appends a record to `topic` as if a producer had written it.
    pub fn push(&self, topic: &str, key: &str, value: &[u8]) -> Message {
        let mut message = Message::new(topic, key.as_bytes(), value);
        message.offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.feeds[topic].send(message.clone()).unwrap();
        self.sent.lock().unwrap().push(message.clone());
        message
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> u32 {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for MemoryBroker {
    async fn send(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing_sends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sends.store(failing - 1, Ordering::SeqCst);
            return Err(Error::transient("broker unreachable"));
        }

        if !self.feeds.contains_key(topic) {
            return Err(Error::permanent(format!("unknown topic {topic}")));
        }

        self.push(topic, &String::from_utf8_lossy(key), value);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemorySource {
    topic: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    failing_fetches: AtomicU32,
    fetch_attempts: AtomicU32,
    commits: Mutex<Vec<i64>>,
    failing_commits: AtomicU32,
    closed: AtomicBool,
}

impl MemorySource {
    fn new(topic: &str, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            topic: topic.to_string(),
            rx: tokio::sync::Mutex::new(rx),
            failing_fetches: AtomicU32::new(0),
            fetch_attempts: AtomicU32::new(0),
            commits: Mutex::new(Vec::new()),
            failing_commits: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub fn fetch_attempts(&self) -> u32 {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> Vec<i64> {
        self.commits.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<Message> {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_fetches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_fetches.store(failing - 1, Ordering::SeqCst);
            return Err(Error::transient("fetch timed out"));
        }

        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    async fn commit(&self, message: &Message) -> Result<()> {
        let failing = self.failing_commits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_commits.store(failing - 1, Ordering::SeqCst);
            return Err(Error::transient("coordinator not available"));
        }
        self.commits.lock().unwrap().push(message.offset);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAdmin {
    existing: Mutex<HashSet<String>>,
    failing: AtomicU32,
    calls: AtomicU32,
}

impl MemoryAdmin {
    pub fn fail_next(&self, n: u32) {
        self.failing.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn exists(&self, topic: &str) -> bool {
        self.existing.lock().unwrap().contains(topic)
    }
}

#[async_trait]
impl TopicAdmin for MemoryAdmin {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing.store(failing - 1, Ordering::SeqCst);
            return Err(Error::transient("controller not available"));
        }

        if self.existing.lock().unwrap().insert(spec.name.clone()) {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    received: Mutex<Vec<NotificationMessage>>,
    failing: AtomicBool,
    attempts: AtomicU32,
}

impl RecordingBroadcaster {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<NotificationMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, message: &NotificationMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transient("hub unavailable"));
        }
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Polls `condition` until it holds, yielding to other tasks in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
