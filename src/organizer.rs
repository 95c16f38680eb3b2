//! Organizer tools: the dashboard of one's own events and the create/edit
//! form submission.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::backend::{Backend, EventQuery};
use crate::error::{AppError, AppResult};
use crate::models::{Event, EventDraft, EventSummary};
use crate::notify::Notifier;
use crate::session::{require_session, Session};
use crate::utils::contains_ignore_case;

pub const LOAD_FAILED: &str = "Failed to load events. Please try again.";
pub const DELETE_FAILED: &str = "Failed to delete event. Please try again.";
pub const SAVE_FAILED: &str = "Failed to save event";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EventWindow {
    #[default]
    All,
    Upcoming,
    Past,
}

/// Attendance rows created on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: usize,
}

pub struct OrganizerDashboard {
    backend: Arc<dyn Backend>,
    session: Session,
    notifier: Notifier,
    window: EventWindow,
    events: Vec<EventSummary>,
    search: String,
    error: Option<String>,
}

impl OrganizerDashboard {
    pub async fn load(
        backend: Arc<dyn Backend>,
        session: Option<&Session>,
        notifier: Notifier,
        window: EventWindow,
    ) -> AppResult<Self> {
        let session = require_session(session)?.clone();
        let mut dashboard = Self {
            backend,
            session,
            notifier,
            window,
            events: Vec::new(),
            search: String::new(),
            error: None,
        };
        dashboard.refresh().await?;
        Ok(dashboard)
    }

    /// Refetches the organizer's events in the current window, with their
    /// RSVP and message counts.
    pub async fn refresh(&mut self) -> AppResult<()> {
        match self.fetch().await {
            Ok(events) => {
                self.events = events;
                self.error = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(user_id = %self.session.user_id, "organizer events fetch failed: {err}");
                self.error = Some(LOAD_FAILED.into());
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> AppResult<Vec<EventSummary>> {
        let now = Utc::now();
        let mut query = EventQuery::organized_by(self.session.user_id.clone());
        match self.window {
            EventWindow::All => {}
            EventWindow::Upcoming => query.from = Some(now),
            EventWindow::Past => query.until = Some(now),
        }

        let events = self.backend.list_events(&query).await?;
        let mut summaries = Vec::with_capacity(events.len());
        for event in events {
            let rsvp_count = self.backend.count_attendance(&event.id).await?;
            let message_count = self.backend.count_messages(&event.id).await?;
            summaries.push(EventSummary {
                event,
                rsvp_count,
                message_count,
            });
        }
        Ok(summaries)
    }

    pub async fn set_window(&mut self, window: EventWindow) -> AppResult<()> {
        self.window = window;
        self.refresh().await
    }

    pub fn window(&self) -> EventWindow {
        self.window
    }

    pub fn search(&mut self, text: &str) {
        self.search = text.to_string();
    }

    /// Events whose title or description contains the search text.
    pub fn visible(&self) -> Vec<&EventSummary> {
        let needle = self.search.to_lowercase();
        self.events
            .iter()
            .filter(|summary| {
                contains_ignore_case(&summary.event.title, &needle)
                    || contains_ignore_case(&summary.event.description, &needle)
            })
            .collect()
    }

    pub fn events(&self) -> &[EventSummary] {
        &self.events
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Deletes one of the organizer's events, along with its attendance and
    /// messages.
    pub async fn delete(&mut self, event_id: &str) -> AppResult<()> {
        if !self.events.iter().any(|summary| summary.event.id == event_id) {
            return Err(AppError::Forbidden(format!(
                "event {event_id} is not one of yours"
            )));
        }
        match self.backend.delete_event(event_id).await {
            Ok(()) => {
                self.events.retain(|summary| summary.event.id != event_id);
                self.error = None;
                self.notifier.success("Event deleted successfully");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(event_id, "event delete failed: {err}");
                self.error = Some(DELETE_FAILED.into());
                Err(err.into())
            }
        }
    }
}

pub async fn create_event(
    backend: &dyn Backend,
    session: Option<&Session>,
    notifier: &Notifier,
    draft: &EventDraft,
) -> AppResult<Event> {
    let session = require_session(session)?;
    let saved = match draft.validate() {
        Ok(()) => backend
            .insert_event(&session.user_id, draft)
            .await
            .map_err(AppError::from),
        Err(err) => Err(err),
    };
    report_save(notifier, saved, "Event created successfully")
}

/// Saves changes to an existing event. Only its organizer may edit it.
pub async fn update_event(
    backend: &dyn Backend,
    session: Option<&Session>,
    notifier: &Notifier,
    event_id: &str,
    draft: &EventDraft,
) -> AppResult<Event> {
    let session = require_session(session)?;
    let saved = async {
        draft.validate()?;
        let existing = backend.get_event(event_id).await?;
        if existing.organizer_id != session.user_id {
            return Err(AppError::Forbidden(
                "only the organizer can edit this event".into(),
            ));
        }
        Ok(backend.update_event(event_id, draft).await?)
    }
    .await;
    report_save(notifier, saved, "Event updated successfully")
}

fn report_save(notifier: &Notifier, saved: AppResult<Event>, success: &str) -> AppResult<Event> {
    match &saved {
        Ok(event) => {
            tracing::info!(event_id = %event.id, "event saved");
            notifier.success(success);
        }
        Err(err) => {
            tracing::warn!("event save failed: {err}");
            notifier.error(SAVE_FAILED);
        }
    }
    saved
}

/// RSVPs for `event_id` grouped by the day they were made, oldest first.
pub async fn rsvps_by_day(backend: &dyn Backend, event_id: &str) -> AppResult<Vec<DayCount>> {
    let rows = backend.list_attendance(event_id).await?;
    let mut days: Vec<DayCount> = Vec::new();
    for row in rows {
        let day = row.created_at.date_naive();
        match days.last_mut() {
            Some(last) if last.day == day => last.count += 1,
            _ => days.push(DayCount { day, count: 1 }),
        }
    }
    Ok(days)
}

/// Whether the signed-in user organizes any event.
pub async fn has_events(backend: &dyn Backend, session: Option<&Session>) -> AppResult<bool> {
    let session = require_session(session)?;
    let events = backend
        .list_events(&EventQuery::organized_by(session.user_id.clone()))
        .await?;
    Ok(!events.is_empty())
}
