use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let root = base.join("event-feed");
    if let Err(err) = fs::create_dir_all(&root) {
        tracing::warn!("failed to create data root {:?}: {err}", root);
    }
    root
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("event-feed.sqlite")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            tracing::warn!("failed to create parent {:?}: {err}", parent);
        }
    }
}

/// Lowercased substring test used by every text filter in the app.
pub fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
