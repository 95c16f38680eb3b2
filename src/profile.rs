use std::sync::Arc;

use chrono::Utc;

use crate::backend::Backend;
use crate::error::AppResult;
use crate::models::Profile;
use crate::session::{require_session, Session};

pub const PREDEFINED_INTERESTS: [&str; 15] = [
    "Sports",
    "Music",
    "Technology",
    "Art",
    "Food",
    "Travel",
    "Photography",
    "Gaming",
    "Reading",
    "Fitness",
    "Movies",
    "Science",
    "Fashion",
    "Business",
    "Education",
];

pub const LOAD_FAILED: &str = "Failed to load profile. Please try again.";
pub const SAVE_FAILED: &str = "Failed to save profile. Please try again.";

/// Edits the signed-in user's profile locally until [`ProfileEditor::save`].
pub struct ProfileEditor {
    backend: Arc<dyn Backend>,
    profile: Profile,
    error: Option<String>,
}

impl ProfileEditor {
    /// Loads the profile, or empty fields if the user has none yet.
    pub async fn load(backend: Arc<dyn Backend>, session: Option<&Session>) -> AppResult<Self> {
        let user_id = require_session(session)?.user_id.clone();
        let profile = match backend.get_profile(&user_id).await {
            Ok(found) => found.unwrap_or_else(|| Profile {
                id: user_id.clone(),
                ..Profile::default()
            }),
            Err(err) => {
                tracing::warn!(%user_id, "profile fetch failed: {err}");
                return Err(err.into());
            }
        };
        Ok(Self {
            backend,
            profile,
            error: None,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_full_name(&mut self, name: &str) {
        self.profile.full_name = name.to_string();
    }

    pub fn set_bio(&mut self, bio: &str) {
        self.profile.bio = bio.to_string();
    }

    pub fn set_location(&mut self, location: &str) {
        self.profile.location = location.to_string();
    }

    /// Adds a tag unless it is blank or already present.
    pub fn add_interest(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.profile.interest_tags.iter().any(|known| known == tag) {
            return false;
        }
        self.profile.interest_tags.push(tag.to_string());
        true
    }

    pub fn remove_interest(&mut self, tag: &str) -> bool {
        let before = self.profile.interest_tags.len();
        self.profile.interest_tags.retain(|known| known != tag.trim());
        self.profile.interest_tags.len() != before
    }

    /// Suggested tags not yet on the profile.
    pub fn available_interests(&self) -> Vec<&'static str> {
        PREDEFINED_INTERESTS
            .iter()
            .copied()
            .filter(|tag| !self.profile.interest_tags.iter().any(|known| known == tag))
            .collect()
    }

    pub async fn save(&mut self) -> AppResult<&Profile> {
        let mut profile = self.profile.clone();
        profile.updated_at = Some(Utc::now());
        match self.backend.upsert_profile(&profile).await {
            Ok(saved) => {
                self.profile = saved;
                self.error = None;
                Ok(&self.profile)
            }
            Err(err) => {
                tracing::warn!(user_id = %profile.id, "profile save failed: {err}");
                self.error = Some(SAVE_FAILED.into());
                Err(err.into())
            }
        }
    }
}
