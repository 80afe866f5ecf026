//! Domain event kinds published by the CRUD services.
//!
//! Each kind travels on its own topic (`review.created` goes to
//! `review-created`) and uses its dotted name as the record key.

use std::fmt;
use std::str::FromStr;

use crate::utils::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EventCreated,
    RegistrationCreated,
    RegistrationDeleted,
    ReviewCreated,
    ReviewUpdated,
    ReviewDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::EventCreated,
        EventKind::RegistrationCreated,
        EventKind::RegistrationDeleted,
        EventKind::ReviewCreated,
        EventKind::ReviewUpdated,
        EventKind::ReviewDeleted,
    ];

    /// Record key, e.g. `review.created`.
    pub fn key(self) -> &'static str {
        match self {
            EventKind::EventCreated => "event.created",
            EventKind::RegistrationCreated => "registration.created",
            EventKind::RegistrationDeleted => "registration.deleted",
            EventKind::ReviewCreated => "review.created",
            EventKind::ReviewUpdated => "review.updated",
            EventKind::ReviewDeleted => "review.deleted",
        }
    }

    /// Topic the kind is published on, e.g. `review-created`.
    pub fn topic(self) -> &'static str {
        match self {
            EventKind::EventCreated => "event-created",
            EventKind::RegistrationCreated => "registration-created",
            EventKind::RegistrationDeleted => "registration-deleted",
            EventKind::ReviewCreated => "review-created",
            EventKind::ReviewUpdated => "review-updated",
            EventKind::ReviewDeleted => "review-deleted",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            EventKind::EventCreated => "New event created",
            EventKind::RegistrationCreated => "New registration",
            EventKind::RegistrationDeleted => "Registration cancelled",
            EventKind::ReviewCreated => "New review posted",
            EventKind::ReviewUpdated => "Review updated",
            EventKind::ReviewDeleted => "Review deleted",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == topic)
    }

    pub fn all_topics() -> Vec<String> {
        Self::ALL.iter().map(|kind| kind.topic().to_string()).collect()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    /// Accepts either the key (`review.created`) or the topic (`review-created`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == s || kind.topic() == s)
            .ok_or_else(|| Error::permanent(format!("unknown event kind: {s}")))
    }
}
