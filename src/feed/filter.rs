use serde::Serialize;

use super::categories::CategorySelection;
use crate::models::{Category, Event};
use crate::utils::contains_ignore_case;

pub const SUGGESTION_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub events: Vec<Event>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

/// Runs both halves of the feed filter: the visible list from the debounced
/// search, and suggestions from the raw search text.
pub fn apply(
    events: &[Event],
    selection: &CategorySelection,
    debounced_search: &str,
    raw_search: &str,
) -> FilterOutcome {
    FilterOutcome {
        events: filter_events(events, selection, debounced_search),
        suggestions: suggestions(events, raw_search),
    }
}

/// The subset of `events` in a selected category (any, when nothing is
/// selected) whose title, description or location contains `search`,
/// ignoring case. Order is preserved.
pub fn filter_events(events: &[Event], selection: &CategorySelection, search: &str) -> Vec<Event> {
    let needle = search.to_lowercase();
    events
        .iter()
        .filter(|event| selection.admits(event))
        .filter(|event| {
            needle.is_empty()
                || contains_ignore_case(&event.title, &needle)
                || contains_ignore_case(&event.description, &needle)
                || contains_ignore_case(&event.location_name, &needle)
        })
        .cloned()
        .collect()
}

/// Up to [`SUGGESTION_LIMIT`] distinct titles whose title or location
/// contains `raw_search`, in list order. Empty search, empty list.
pub fn suggestions(events: &[Event], raw_search: &str) -> Vec<String> {
    if raw_search.is_empty() {
        return Vec::new();
    }
    let needle = raw_search.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for event in events {
        if out.len() == SUGGESTION_LIMIT {
            break;
        }
        let hit = contains_ignore_case(&event.title, &needle)
            || contains_ignore_case(&event.location_name, &needle);
        if hit && !out.iter().any(|title| *title == event.title) {
            out.push(event.title.clone());
        }
    }
    out
}

/// Per-category totals over `events`, in the fixed category order.
pub fn category_counts(events: &[Event]) -> Vec<CategoryCount> {
    Category::ALL
        .iter()
        .map(|category| CategoryCount {
            category: *category,
            count: events
                .iter()
                .filter(|event| event.category == *category)
                .count(),
        })
        .collect()
}
