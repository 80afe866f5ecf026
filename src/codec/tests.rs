use serde_json::{Value, json};

use super::envelope::{decode, reencode};
use super::notification::NotificationMessage;
use crate::broker::message::Message;
use crate::utils::Error;

#[test]
fn test_decode_accepts_any_json_shape() {
    assert_eq!(decode(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
    assert_eq!(decode(b"[1,2,3]").unwrap(), json!([1, 2, 3]));
    assert_eq!(decode(b"\"text\"").unwrap(), json!("text"));
}

#[test]
fn test_decode_failure_is_permanent() {
    let err = decode(b"{not json").unwrap_err();
    assert!(matches!(err, Error::Permanent(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_reencode_is_canonical() {
    let a = decode(br#"{ "username": "alice",  "event_id": "42" }"#).unwrap();
    let b = decode(br#"{"event_id":"42","username":"alice"}"#).unwrap();

    assert_eq!(reencode(&a).unwrap(), reencode(&b).unwrap());
    assert_eq!(
        reencode(&a).unwrap(),
        br#"{"event_id":"42","username":"alice"}"#.to_vec()
    );
}

#[test]
fn test_notification_from_review_message() {
    let payload = br#"{"event_id":"42","username":"alice","rating":"5","comment":"great"}"#;
    let message = Message::new("review-created", "review.created", payload.as_slice());

    let notification = NotificationMessage::from_broker(&message).unwrap();

    assert_eq!(notification.kind, "review-created");
    assert_eq!(notification.title, "New review posted");
    let round: Value = serde_json::from_str(&notification.message).unwrap();
    assert_eq!(round, serde_json::from_slice::<Value>(payload).unwrap());
    assert!(notification.event_date.is_none());
    assert!(!notification.timestamp.is_empty());
}

#[test]
fn test_notification_from_event_created_carries_event_fields() {
    let payload = json!({
        "event_name": "RustConf",
        "event_date": "2026-09-01",
        "event_location": "Montreal",
        "organizer_name": "bob"
    });
    let message = Message::new(
        "event-created",
        "event.created",
        serde_json::to_vec(&payload).unwrap(),
    );

    let notification = NotificationMessage::from_broker(&message).unwrap();

    assert_eq!(notification.title, "New event created");
    assert_eq!(notification.event_date.as_deref(), Some("2026-09-01"));
    assert_eq!(notification.location.as_deref(), Some("Montreal"));
    assert_eq!(notification.organizer.as_deref(), Some("bob"));
}

#[test]
fn test_notification_for_unknown_topic_gets_generic_title() {
    let message = Message::new("audit-log", "audit", b"{}".as_slice());
    let notification = NotificationMessage::from_broker(&message).unwrap();
    assert_eq!(notification.title, "New notification");
}

#[test]
fn test_notification_json_uses_type_and_omits_empty_fields() {
    let notification = NotificationMessage::new("review-deleted", "Review deleted", "{}");
    let value: Value = serde_json::from_str(&notification.to_json().unwrap()).unwrap();

    assert_eq!(value["type"], "review-deleted");
    assert_eq!(value["message"], "{}");
    assert!(value.get("event_date").is_none());
    assert!(value.get("location").is_none());
}
