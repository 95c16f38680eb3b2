//! All-events browser with server-side filters, kept current by change
//! notifications on the events table.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::backend::{Backend, EventQuery};
use crate::models::{Category, Event};
use crate::realtime::{ChangeKey, Subscription, Table};

pub const LOAD_FAILED: &str = "Failed to load events. Please try again.";

pub struct EventBrowser {
    backend: Arc<dyn Backend>,
    category: Option<Category>,
    day: Option<NaiveDate>,
    search: String,
    events: Vec<Event>,
    error: Option<String>,
    subscription: Subscription,
}

impl EventBrowser {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let subscription = backend.changes().subscribe(ChangeKey::table(Table::Events));
        Self {
            backend,
            category: None,
            day: None,
            search: String::new(),
            events: Vec::new(),
            error: None,
            subscription,
        }
    }

    pub fn query(&self) -> EventQuery {
        let mut query = EventQuery::default().matching(self.search.clone());
        if let Some(category) = self.category {
            query = query.in_categories([category.as_str()]);
        }
        if let Some(day) = self.day {
            query = query.on_day(day);
        }
        query
    }

    /// Refetches with the current filters. On failure the previous list stays
    /// and the error message is set.
    pub async fn refresh(&mut self) {
        let query = self.query();
        match self.backend.list_events(&query).await {
            Ok(events) => {
                tracing::debug!(count = events.len(), "browse events fetched");
                self.events = events;
                self.error = None;
            }
            Err(err) => {
                tracing::warn!("browse event fetch failed: {err}");
                self.error = Some(LOAD_FAILED.into());
            }
        }
    }

    pub async fn set_category(&mut self, category: Option<Category>) {
        self.category = category;
        self.refresh().await;
    }

    pub async fn set_day(&mut self, day: Option<NaiveDate>) {
        self.day = day;
        self.refresh().await;
    }

    pub async fn set_search(&mut self, text: &str) {
        self.search = text.trim().to_string();
        self.refresh().await;
    }

    /// Waits for any change to the events table, then refetches. Returns
    /// `false` once the change stream is closed.
    pub async fn next_change(&mut self) -> bool {
        match self.subscription.recv().await {
            Some(change) => {
                tracing::trace!(kind = ?change.kind, "events table changed");
                self.refresh().await;
                true
            }
            None => false,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Coordinates of the first listed event, for centering a map.
    pub fn map_center(&self) -> Option<(f64, f64)> {
        self.events
            .first()
            .map(|event| (event.latitude, event.longitude))
    }
}
