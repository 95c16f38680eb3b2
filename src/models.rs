use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The fixed set of event categories, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Music,
    Tech,
    Art,
    Sports,
    Food,
    Business,
    Education,
    Social,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Music,
        Category::Tech,
        Category::Art,
        Category::Sports,
        Category::Food,
        Category::Business,
        Category::Education,
        Category::Social,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Music => "Music",
            Category::Tech => "Tech",
            Category::Art => "Art",
            Category::Sports => "Sports",
            Category::Food => "Food",
            Category::Business => "Business",
            Category::Education => "Education",
            Category::Social => "Social",
            Category::Other => "Other",
        }
    }

    /// Strict lookup: `None` for names outside the enumeration.
    pub fn parse(name: &str) -> Option<Category> {
        Category::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == name.trim())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Rows written by older clients may carry names we no longer know about.
impl From<String> for Category {
    fn from(value: String) -> Self {
        Category::parse(&value).unwrap_or(Category::Other)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub organizer_id: String,
}

impl Event {
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.datetime < now
    }
}

/// The editable part of an event, as submitted by its organizer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub datetime: DateTime<Utc>,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl EventDraft {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Event title is required".into()));
        }
        if self.location_name.trim().is_empty() || self.latitude == 0.0 || self.longitude == 0.0 {
            return Err(AppError::Validation(
                "Please select a location for your event".into(),
            ));
        }
        Ok(())
    }
}

impl From<&Event> for EventDraft {
    fn from(event: &Event) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            category: event.category,
            datetime: event.datetime,
            location_name: event.location_name.clone(),
            latitude: event.latitude,
            longitude: event.longitude,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub interest_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One RSVP row. Presence means "attending".
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attendance {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    #[serde(default)]
    pub first_chat: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub event_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_organizer: bool,
}

/// An organizer's event together with its engagement counters.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct EventSummary {
    pub event: Event,
    pub rsvp_count: u64,
    pub message_count: u64,
}
