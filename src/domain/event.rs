//! Event types: the capacity record every admission decision reads and mutates.
//!
//! An event is proposed by its initiator, edited while unpublished, and published by an
//! administrator. Only published events accept participation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        EventId(id)
    }
}

impl std::ops::Deref for EventId {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user (event initiator or requester).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

impl std::ops::Deref for UserId {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Publication state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventState {
    /// Waiting for administrative review.
    Pending,
    /// Open for participation requests.
    Published,
    /// Rejected by an administrator.
    Canceled,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Pending => "PENDING",
            EventState::Published => "PUBLISHED",
            EventState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventState::Pending),
            "PUBLISHED" => Ok(EventState::Published),
            "CANCELED" => Ok(EventState::Canceled),
            other => Err(format!("unknown event state '{other}'")),
        }
    }
}

/// An event together with its capacity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub initiator_id: UserId,
    pub title: String,
    /// Maximum number of confirmed participants; `0` means unlimited.
    pub participant_limit: u32,
    /// Cached tally of confirmed requests.
    pub confirmed_requests: u32,
    /// When false, every accepted request is confirmed immediately.
    pub request_moderation: bool,
    pub state: EventState,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Event {
    /// True when the event has no participant limit.
    pub fn is_unlimited(&self) -> bool {
        self.participant_limit == 0
    }

    /// True when a limit exists and every seat is taken.
    pub fn is_saturated(&self) -> bool {
        !self.is_unlimited() && self.confirmed_requests >= self.participant_limit
    }

    /// Seats still free, or `None` for unlimited events.
    pub fn available_seats(&self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.participant_limit.saturating_sub(self.confirmed_requests))
        }
    }

    /// True when requests for this event never wait for the initiator.
    pub fn admits_without_review(&self) -> bool {
        self.is_unlimited() || !self.request_moderation
    }

    pub fn is_published(&self) -> bool {
        self.state == EventState::Published
    }

    /// Apply an initiator edit. Published events are frozen.
    pub fn apply_update(&mut self, update: &EventUpdate) -> Result<()> {
        if self.state == EventState::Published {
            return Err(TurnstileError::InvalidState(format!(
                "Event {} is already published and can no longer be edited",
                self.id
            )));
        }
        if let Some(title) = &update.title {
            validate_title(title)?;
            self.title = title.clone();
        }
        if let Some(limit) = update.participant_limit {
            self.participant_limit = limit;
        }
        if let Some(moderation) = update.request_moderation {
            self.request_moderation = moderation;
        }
        Ok(())
    }

    /// Administrative publish: only a pending event can go live.
    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != EventState::Pending {
            return Err(TurnstileError::InvalidState(format!(
                "Event {} cannot be published from state {}",
                self.id, self.state
            )));
        }
        self.state = EventState::Published;
        self.published_at = Some(now);
        Ok(())
    }

    /// Administrative rejection: anything but a published event can be canceled.
    pub fn reject(&mut self) -> Result<()> {
        if self.state == EventState::Published {
            return Err(TurnstileError::InvalidState(format!(
                "Event {} is already published and cannot be rejected",
                self.id
            )));
        }
        self.state = EventState::Canceled;
        Ok(())
    }
}

/// Input parameters for proposing a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub participant_limit: u32,
    #[serde(default = "default_moderation")]
    pub request_moderation: bool,
}

fn default_moderation() -> bool {
    true
}

impl NewEvent {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)
    }
}

/// Partial edit of an unpublished event. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdate {
    pub title: Option<String>,
    pub participant_limit: Option<u32>,
    pub request_moderation: Option<bool>,
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TurnstileError::ValidationError(
            "Event title must not be blank".to_string(),
        ));
    }
    Ok(())
}
