//! Cross-module scenarios run against the scripted in-memory backend.

use std::sync::Arc;

use crate::backend::Backend;
use crate::models::Profile;
use crate::testing::ScriptedBackend;

mod chat;
mod organizer;

pub fn shared(backend: &Arc<ScriptedBackend>) -> Arc<dyn Backend> {
    backend.clone()
}

pub async fn save_profile(backend: &ScriptedBackend, user_id: &str, name: &str, interests: &[&str]) {
    backend
        .store()
        .upsert_profile(&Profile {
            id: user_id.into(),
            full_name: name.into(),
            interest_tags: interests.iter().map(|tag| tag.to_string()).collect(),
            ..Profile::default()
        })
        .await
        .unwrap();
}
