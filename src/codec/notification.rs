use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::events::EventKind;
use crate::broker::message::Message;
use crate::codec::envelope::{decode, reencode};
use crate::utils::{Error, Result};

const GENERIC_TITLE: &str = "New notification";

/// Frame pushed to every subscriber.
///
/// `kind` is the topic the payload arrived on and `message` holds the
/// canonical JSON of the original payload. The event fields are only filled
/// for `event-created` notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    pub timestamp: String,
}

impl NotificationMessage {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            event_date: None,
            location: None,
            organizer: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Builds the notification for a record fetched from the broker.
    pub fn from_broker(message: &Message) -> Result<Self> {
        let payload = decode(&message.value)?;
        let canonical = String::from_utf8(reencode(&payload)?)
            .map_err(|err| Error::permanent(format!("re-encoded payload is not UTF-8: {err}")))?;

        let kind = EventKind::from_topic(&message.topic);
        let title = kind.map_or(GENERIC_TITLE, EventKind::title);
        let mut notification = Self::new(&message.topic, title, canonical);

        if kind == Some(EventKind::EventCreated) {
            notification.event_date = string_field(&payload, "event_date");
            notification.location = string_field(&payload, "event_location");
            notification.organizer = string_field(&payload, "organizer_name");
        }

        Ok(notification)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn string_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}
