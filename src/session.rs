use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

/// The signed-in user, handed explicitly to every component that acts on
/// their behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: Option<String>,
    pub display_name: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
            display_name: None,
        }
    }

    /// Builds the session a previous sign-in left in the config, if any.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let user_id = config.user_id.as_ref()?.trim();
        if user_id.is_empty() {
            return None;
        }
        Some(Self {
            user_id: user_id.to_string(),
            access_token: config.access_token.clone(),
            display_name: config.display_name.clone(),
        })
    }
}

pub fn require_session(session: Option<&Session>) -> Result<&Session, AppError> {
    session.ok_or(AppError::SignInRequired)
}
