//! The personalized feed: upcoming events narrowed by category filters and a
//! debounced free-text search, with title suggestions that follow the raw
//! search text.

pub mod categories;
pub mod debounce;
pub mod filter;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::backend::{Backend, EventQuery};
use crate::error::AppResult;
use crate::models::Event;
use crate::session::{require_session, Session};

pub use categories::CategorySelection;
pub use debounce::Debouncer;
pub use filter::{CategoryCount, FilterOutcome, SUGGESTION_LIMIT};

pub const PROFILE_LOAD_FAILED: &str = "Failed to load user preferences.";
pub const EVENTS_LOAD_FAILED: &str = "Failed to load events.";

/// Why the visible list is empty, so the two situations get different
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmptyState {
    /// The profile has no interests configured.
    NoInterests,
    /// A search is active and nothing matches it.
    NoSearchMatches,
    /// The category filters exclude everything.
    NoCategoryMatches,
}

/// Filter inputs and derived outputs. Every input change recomputes the
/// outputs that depend on it, so the visible list is never stale.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    events: Vec<Event>,
    selection: CategorySelection,
    raw_search: String,
    debounced_search: String,
    visible: Vec<Event>,
    suggestions: Vec<String>,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
        self.refilter();
        self.resuggest();
    }

    pub fn set_selection(&mut self, selection: CategorySelection) {
        self.selection = selection;
        self.refilter();
    }

    pub fn toggle_category(&mut self, name: &str) -> bool {
        let changed = self.selection.toggle(name);
        if changed {
            self.refilter();
        }
        changed
    }

    pub fn clear_categories(&mut self) {
        self.selection.clear();
        self.refilter();
    }

    pub fn set_raw_search(&mut self, text: &str) {
        self.raw_search = text.to_string();
        self.resuggest();
    }

    pub fn apply_debounced(&mut self, text: &str) {
        self.debounced_search = text.to_string();
        self.refilter();
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn visible(&self) -> &[Event] {
        &self.visible
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn selection(&self) -> &CategorySelection {
        &self.selection
    }

    pub fn raw_search(&self) -> &str {
        &self.raw_search
    }

    pub fn debounced_search(&self) -> &str {
        &self.debounced_search
    }

    fn refilter(&mut self) {
        self.visible = filter::filter_events(&self.events, &self.selection, &self.debounced_search);
    }

    fn resuggest(&mut self) {
        self.suggestions = filter::suggestions(&self.events, &self.raw_search);
    }
}

/// Plain data handed to whatever renders the feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    pub events: Vec<Event>,
    pub suggestions: Vec<String>,
    pub category_counts: Vec<CategoryCount>,
    pub selected_categories: Vec<String>,
    pub search: String,
    pub show_all: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub empty_state: Option<EmptyState>,
}

pub struct Feed {
    backend: Arc<dyn Backend>,
    session: Option<Session>,
    state: FeedState,
    /// `None` until the profile has been read.
    interests: Option<Vec<String>>,
    show_all: bool,
    loading: bool,
    error: Option<String>,
    debouncer: Debouncer<String>,
    debounced: watch::Receiver<String>,
}

impl Feed {
    pub fn new(backend: Arc<dyn Backend>, session: Option<Session>, debounce: Duration) -> Self {
        let debouncer = Debouncer::new(String::new(), debounce);
        let debounced = debouncer.subscribe();
        Self {
            backend,
            session,
            state: FeedState::new(),
            interests: None,
            show_all: false,
            loading: true,
            error: None,
            debouncer,
            debounced,
        }
    }

    /// Reads the profile, seeds the category filters from its interests and
    /// fetches upcoming events. Backend failures land in the error banner.
    pub async fn load(&mut self) -> AppResult<()> {
        let user_id = require_session(self.session.as_ref())?.user_id.clone();

        match self.backend.get_profile(&user_id).await {
            Ok(profile) => {
                let interests = profile.map(|p| p.interest_tags).unwrap_or_default();
                self.state
                    .set_selection(CategorySelection::from_interests(&interests));
                self.interests = Some(interests);
            }
            Err(err) => {
                tracing::warn!(%user_id, "profile fetch failed: {err}");
                self.error = Some(PROFILE_LOAD_FAILED.to_string());
            }
        }

        self.refresh_events().await;
        Ok(())
    }

    /// Refetches upcoming events. On failure the last-known list stays.
    pub async fn refresh_events(&mut self) {
        let mut query = EventQuery::upcoming(Utc::now());
        if !self.show_all {
            if let Some(interests) = self.interests.as_ref().filter(|tags| !tags.is_empty()) {
                query = query.in_categories(interests.iter().cloned());
            }
        }

        match self.backend.list_events(&query).await {
            Ok(events) => {
                tracing::debug!(count = events.len(), show_all = self.show_all, "feed events fetched");
                self.state.set_events(events);
            }
            Err(err) => {
                tracing::warn!("feed event fetch failed: {err}");
                self.error = Some(EVENTS_LOAD_FAILED.to_string());
            }
        }
        self.loading = false;
    }

    /// Switches between interest-matched and all upcoming events.
    pub async fn toggle_show_all(&mut self) {
        self.show_all = !self.show_all;
        self.refresh_events().await;
    }

    /// Updates the raw search text. Suggestions follow immediately; the
    /// visible list follows once the text settles.
    pub fn set_search(&mut self, text: &str) {
        self.state.set_raw_search(text);
        self.debouncer.push(text.to_string());
    }

    pub fn choose_suggestion(&mut self, title: &str) {
        self.state.set_raw_search(title);
        self.debouncer.flush(title.to_string());
        self.apply_pending();
    }

    /// Waits until the latest search text has gone through the debouncer and
    /// applies it. Older values that fire on the way are applied as they
    /// arrive.
    pub async fn settle(&mut self) {
        loop {
            self.apply_pending();
            if !self.debouncer.is_pending()
                || self.state.debounced_search() == self.state.raw_search()
            {
                return;
            }
            if self.debounced.changed().await.is_err() {
                return;
            }
            let text = self.debounced.borrow_and_update().clone();
            self.state.apply_debounced(&text);
        }
    }

    /// Applies a debounced value that has already arrived, without waiting.
    pub fn apply_pending(&mut self) {
        if self.debounced.has_changed().unwrap_or(false) {
            let text = self.debounced.borrow_and_update().clone();
            self.state.apply_debounced(&text);
        }
    }

    pub fn toggle_category(&mut self, name: &str) -> bool {
        self.state.toggle_category(name)
    }

    pub fn clear_categories(&mut self) {
        self.state.clear_categories();
    }

    pub fn clear_filters(&mut self) {
        self.state.set_raw_search("");
        self.debouncer.flush(String::new());
        self.apply_pending();
        self.state.clear_categories();
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Totals per category over the fetched list, before client-side filters.
    pub fn category_counts(&self) -> Vec<CategoryCount> {
        filter::category_counts(self.state.events())
    }

    pub fn empty_state(&self) -> Option<EmptyState> {
        if matches!(&self.interests, Some(tags) if tags.is_empty()) {
            return Some(EmptyState::NoInterests);
        }
        if !self.state.visible().is_empty() || self.loading {
            return None;
        }
        if self.state.raw_search().is_empty() {
            Some(EmptyState::NoCategoryMatches)
        } else {
            Some(EmptyState::NoSearchMatches)
        }
    }

    pub fn view(&self) -> FeedView {
        FeedView {
            events: self.state.visible().to_vec(),
            suggestions: self.state.suggestions().to_vec(),
            category_counts: self.category_counts(),
            selected_categories: self.state.selection().names().map(str::to_string).collect(),
            search: self.state.raw_search().to_string(),
            show_all: self.show_all,
            loading: self.loading,
            error: self.error.clone(),
            empty_state: self.empty_state(),
        }
    }
}
