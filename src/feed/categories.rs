use std::collections::BTreeSet;

use crate::models::{Category, Event};

/// The active category filters. An empty selection means "no category
/// restriction".
///
/// Seeding from profile interests keeps the tags verbatim, so an interest
/// that is not a category narrows the feed to nothing for that tag rather
/// than being silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySelection {
    names: BTreeSet<String>,
}

impl CategorySelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_interests<I, S>(interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = interests
            .into_iter()
            .map(|tag| tag.as_ref().trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();
        Self { names }
    }

    /// Adds `name` if absent, removes it if present. Names outside the
    /// category enumeration are ignored; returns whether anything changed.
    pub fn toggle(&mut self, name: &str) -> bool {
        let Some(category) = Category::parse(name) else {
            return false;
        };
        let key = category.as_str();
        if !self.names.remove(key) {
            self.names.insert(key.to_string());
        }
        true
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether `event` passes the category restriction.
    pub fn admits(&self, event: &Event) -> bool {
        self.names.is_empty() || self.names.contains(event.category.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
