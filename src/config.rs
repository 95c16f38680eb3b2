use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils;

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing backend anon key; set EVENT_FEED_ANON_KEY or `anon_key` in the config file")]
    MissingAnonKey,
    #[error("invalid backend URL {0:?}: must be an absolute http(s) URL")]
    InvalidBackendUrl(String),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub debounce_ms: u64,
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            access_token: None,
            user_id: None,
            display_name: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            database_path: None,
        }
    }
}

/// Connection details for the hosted backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub base_url: Url,
    pub anon_key: String,
    pub access_token: Option<String>,
}

impl AppConfig {
    /// Environment variables win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_value("EVENT_FEED_BACKEND_URL") {
            self.backend_url = Some(value);
        }
        if let Some(value) = env_value("EVENT_FEED_ANON_KEY") {
            self.anon_key = Some(value);
        }
        if let Some(value) = env_value("EVENT_FEED_ACCESS_TOKEN") {
            self.access_token = Some(value);
        }
        if let Some(value) = env_value("EVENT_FEED_USER_ID") {
            self.user_id = Some(value);
        }
        if let Some(ms) = env_value("EVENT_FEED_DEBOUNCE_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.debounce_ms = ms;
        }
        self
    }

    /// `Ok(None)` means no hosted backend is configured and the local store
    /// should be used.
    pub fn remote(&self) -> Result<Option<RemoteSettings>, ConfigError> {
        let raw_url = match self.backend_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return Ok(None),
        };

        let base_url = Url::parse(raw_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| ConfigError::InvalidBackendUrl(raw_url.to_string()))?;

        let anon_key = self
            .anon_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingAnonKey)?
            .to_string();

        Ok(Some(RemoteSettings {
            base_url,
            anon_key,
            access_token: self.access_token.clone(),
        }))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = match read_config(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring unreadable config at {:?}: {err}", path);
                AppConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_url_means_local_mode() {
        let config = AppConfig::default();
        assert_eq!(config.remote().unwrap(), None);
    }

    #[test]
    fn remote_requires_valid_url_and_key() {
        let mut config = AppConfig {
            backend_url: Some("not a url".into()),
            anon_key: Some("anon".into()),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.remote(),
            Err(ConfigError::InvalidBackendUrl(_))
        ));

        config.backend_url = Some("ftp://example.com".into());
        assert!(matches!(
            config.remote(),
            Err(ConfigError::InvalidBackendUrl(_))
        ));

        config.backend_url = Some("https://project.example.co".into());
        config.anon_key = None;
        assert!(matches!(config.remote(), Err(ConfigError::MissingAnonKey)));

        config.anon_key = Some("anon".into());
        let remote = config.remote().unwrap().unwrap();
        assert_eq!(remote.base_url.host_str(), Some("project.example.co"));
        assert_eq!(remote.anon_key, "anon");
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let store = ConfigStore::load_from(path.clone());
        assert_eq!(store.read().debounce_ms, DEFAULT_DEBOUNCE_MS);

        store
            .update(|config| {
                config.user_id = Some("user-7".into());
                config.debounce_ms = 150;
            })
            .unwrap();

        let reloaded = ConfigStore::load_from(path);
        let config = reloaded.read();
        assert_eq!(config.user_id.as_deref(), Some("user-7"));
        assert_eq!(config.debounce_ms, 150);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"user_id":"u"}"#).unwrap();
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.user_id.as_deref(), Some("u"));
    }
}
