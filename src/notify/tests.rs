use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;

use super::service::NotificationService;
use super::supervisor::Supervisor;
use crate::broker::consumer::MessageSource;
use crate::broker::producer::Publisher;
use crate::codec::{NotificationMessage, decode, reencode};
use crate::config::HubSettings;
use crate::hub::Registry;
use crate::retry::RetryStrategy;
use crate::testing::{MemoryBroker, MemorySource, RecordingBroadcaster, eventually};

const REVIEW: &[u8] = br#"{"event_id":"42","username":"alice","rating":"5","comment":"great"}"#;

fn quick_retry(attempts: u32) -> RetryStrategy {
    RetryStrategy::new(attempts, Duration::from_millis(10), 2.0)
}

fn supervisor(
    sources: &[&Arc<MemorySource>],
    broadcaster: &Arc<RecordingBroadcaster>,
    attempts: u32,
) -> Supervisor {
    let sources = sources
        .iter()
        .map(|source| Arc::clone(*source) as Arc<dyn MessageSource>)
        .collect();
    Supervisor::new(
        "notification-group",
        sources,
        broadcaster.clone(),
        quick_retry(attempts),
    )
}

fn canonical(raw: &[u8]) -> String {
    String::from_utf8(reencode(&decode(raw).unwrap()).unwrap()).unwrap()
}

#[tokio::test]
async fn test_dispatches_and_commits_in_fetch_order() {
    let broker = MemoryBroker::new(&["review-created"]);
    let source = broker.source("review-created");
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&source], &broadcaster, 3);

    for rating in ["1", "2", "3"] {
        let payload = format!(r#"{{"rating":"{rating}"}}"#);
        broker.push("review-created", "review.created", payload.as_bytes());
    }
    supervisor.start(&CancellationToken::new());

    eventually(|| source.commits() == vec![0, 1, 2]).await;
    let received = broadcaster.received();
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].message, r#"{"rating":"1"}"#);
    assert_eq!(received[2].message, r#"{"rating":"3"}"#);
    assert!(received.iter().all(|n| n.title == "New review posted"));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_message_is_committed_and_skipped() {
    let broker = MemoryBroker::new(&["review-created"]);
    let source = broker.source("review-created");
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&source], &broadcaster, 3);

    broker.push("review-created", "review.created", b"{not json");
    broker.push("review-created", "review.created", REVIEW);
    supervisor.start(&CancellationToken::new());

    eventually(|| source.commits() == vec![0, 1]).await;
    assert_eq!(broadcaster.received().len(), 1);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_broadcast_leaves_offset_uncommitted() {
    let broker = MemoryBroker::new(&["review-deleted"]);
    let source = broker.source("review-deleted");
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    broadcaster.set_failing(true);
    let mut supervisor = supervisor(&[&source], &broadcaster, 3);
    supervisor.start(&CancellationToken::new());

    broker.push("review-deleted", "review.deleted", REVIEW);
    eventually(|| broadcaster.attempts() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(source.commits().is_empty());

    broadcaster.set_failing(false);
    broker.push("review-deleted", "review.deleted", REVIEW);
    eventually(|| source.commits() == vec![1]).await;
    assert_eq!(broadcaster.received().len(), 1);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_commit_is_reported_and_dispatch_continues() {
    let broker = MemoryBroker::new(&["registration-created"]);
    let source = broker.source("registration-created");
    source.fail_next_commits(1);
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&source], &broadcaster, 3);

    broker.push("registration-created", "registration.created", REVIEW);
    broker.push("registration-created", "registration.created", REVIEW);
    supervisor.start(&CancellationToken::new());

    eventually(|| source.commits() == vec![1]).await;
    assert_eq!(broadcaster.received().len(), 2);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_transient_fetch_failures_deliver_exactly_once() {
    let broker = MemoryBroker::new(&["review-created"]);
    let source = broker.source("review-created");
    source.fail_next_fetches(2);
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&source], &broadcaster, 5);

    broker.push("review-created", "review.created", REVIEW);
    supervisor.start(&CancellationToken::new());

    eventually(|| source.commits() == vec![0]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(source.fetch_attempts() >= 3);
    assert_eq!(broadcaster.attempts(), 1);
    assert_eq!(broadcaster.received()[0].message, canonical(REVIEW));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_topic_does_not_stop_other_topics() {
    let broker = MemoryBroker::new(&["review-created", "event-created"]);
    let broken = broker.source("review-created");
    let healthy = broker.source("event-created");
    broken.fail_next_fetches(100);
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&broken, &healthy], &broadcaster, 2);
    supervisor.start(&CancellationToken::new());

    eventually(|| broken.fetch_attempts() == 2).await;
    broker.push(
        "event-created",
        "event.created",
        br#"{"event_name":"RustConf","event_date":"2026-09-01","event_location":"Montreal","organizer_name":"Ferris"}"#,
    );

    eventually(|| healthy.commits() == vec![0]).await;
    let received = broadcaster.received();
    assert_eq!(received[0].kind, "event-created");
    assert_eq!(received[0].location.as_deref(), Some("Montreal"));
    assert_eq!(broken.fetch_attempts(), 2);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_every_reader() {
    let broker = MemoryBroker::new(&["review-created", "review-updated"]);
    let created = broker.source("review-created");
    let updated = broker.source("review-updated");
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let mut supervisor = supervisor(&[&created, &updated], &broadcaster, 3);

    let parent = CancellationToken::new();
    supervisor.start(&parent);
    supervisor.stop().await.unwrap();

    assert!(created.is_closed());
    assert!(updated.is_closed());
    assert!(!parent.is_cancelled());
}

#[tokio::test]
async fn test_published_review_reaches_websocket_subscriber_once() {
    let broker = MemoryBroker::new(&["review-created"]);
    let source = broker.source("review-created");
    let registry = Registry::new(HubSettings::default());
    let supervisor = Supervisor::new(
        "notification-group",
        vec![source.clone() as Arc<dyn MessageSource>],
        Arc::new(registry.clone()),
        quick_retry(3),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let service = NotificationService::new(registry.clone(), supervisor, listener, "/ws");
    let running = tokio::spawn(service.run(cancel.clone()));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    eventually(|| registry.connected_count() == 1).await;

    let publisher = Publisher::new("review-created", broker.clone());
    publisher
        .send_with_retry(quick_retry(3), &cancel, b"review.created", REVIEW)
        .await
        .unwrap();

    let text = match ws.next().await.unwrap().unwrap() {
        WsMessage::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    };
    let notification: NotificationMessage = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(notification.kind, "review-created");
    assert_eq!(notification.message, canonical(REVIEW));

    let second = tokio::time::timeout(Duration::from_millis(100), ws.next()).await;
    assert!(second.is_err(), "expected exactly one notification");
    eventually(|| source.commits() == vec![0]).await;

    cancel.cancel();
    running.await.unwrap().unwrap();
    assert!(source.is_closed());
    assert_eq!(registry.connected_count(), 0);
}
