pub mod local;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{Attendance, ChatMessage, Event, EventDraft, Profile};
use crate::realtime::ChangeStream;

pub use local::LocalStore;
pub use rest::RestBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(String),
    #[error("backend rejected request ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

/// Server-side event filters. Every field left empty imposes no restriction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    /// Category names, matched verbatim (`category IN (...)`).
    pub categories: Vec<String>,
    pub organizer_id: Option<String>,
    /// Inclusive lower bound on the start time.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the start time.
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring on title or location name.
    pub text: Option<String>,
}

impl EventQuery {
    pub fn upcoming(now: DateTime<Utc>) -> Self {
        Self {
            from: Some(now),
            ..Self::default()
        }
    }

    pub fn organized_by(user_id: impl Into<String>) -> Self {
        Self {
            organizer_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn in_categories<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = names.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts to events starting on the given UTC calendar day.
    pub fn on_day(mut self, day: NaiveDate) -> Self {
        let start = day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        self.from = start;
        self.until = start.map(|start| start + Duration::days(1));
        self
    }

    pub fn matching(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }
}

/// The hosted data service the app is built on: row queries, attendance,
/// profiles, chat messages and change notifications.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Events matching `query`, ordered by start time ascending.
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, BackendError>;
    async fn get_event(&self, id: &str) -> Result<Event, BackendError>;
    async fn insert_event(
        &self,
        organizer_id: &str,
        draft: &EventDraft,
    ) -> Result<Event, BackendError>;
    async fn update_event(&self, id: &str, draft: &EventDraft) -> Result<Event, BackendError>;
    /// Also removes the event's attendance rows and messages.
    async fn delete_event(&self, id: &str) -> Result<(), BackendError>;

    async fn find_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Option<Attendance>, BackendError>;
    /// New rows start with `first_chat = false`.
    async fn insert_attendance(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Attendance, BackendError>;
    async fn delete_attendance(&self, event_id: &str, user_id: &str) -> Result<(), BackendError>;
    async fn count_attendance(&self, event_id: &str) -> Result<u64, BackendError>;
    /// Ordered by creation time.
    async fn list_attendance(&self, event_id: &str) -> Result<Vec<Attendance>, BackendError>;
    async fn mark_first_chat(&self, attendance_id: &str) -> Result<(), BackendError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;
    async fn upsert_profile(&self, profile: &Profile) -> Result<Profile, BackendError>;

    /// Ordered by creation time, with the sender's display name when known.
    async fn list_messages(&self, event_id: &str) -> Result<Vec<ChatMessage>, BackendError>;
    async fn insert_message(
        &self,
        event_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<ChatMessage, BackendError>;
    async fn count_messages(&self, event_id: &str) -> Result<u64, BackendError>;

    fn changes(&self) -> &dyn ChangeStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_window_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2030, 3, 9).unwrap();
        let query = EventQuery::default().on_day(day);
        assert_eq!(
            query.from.unwrap().to_rfc3339(),
            "2030-03-09T00:00:00+00:00"
        );
        assert_eq!(
            query.until.unwrap().to_rfc3339(),
            "2030-03-10T00:00:00+00:00"
        );
    }

    #[test]
    fn blank_text_imposes_no_restriction() {
        assert_eq!(EventQuery::default().matching("  ").text, None);
        assert_eq!(
            EventQuery::default().matching("jam").text.as_deref(),
            Some("jam")
        );
    }
}
