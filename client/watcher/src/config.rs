use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};

use crate::error::WatchError;

pub const DEFAULT_EVENT_ID: &str = "zRLhtOq7pOcB";
pub const DEFAULT_GRAPHQL_URL: &str = "https://atleta.cc/api/graphql";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_RATE_LIMIT_FALLBACK_SECS: u64 = 60;
const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub event_id: String,
    pub graphql_url: String,
    pub event_page_url: String,
    pub poll_interval: Duration,
    pub rate_limit_fallback: Duration,
    pub limit: u32,
    pub sound_check: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub event_id: Option<String>,
    pub graphql_url: Option<String>,
    pub event_page_url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub rate_limit_fallback_secs: Option<u64>,
    pub limit: Option<u32>,
    pub sound_check: Option<bool>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from_sources(FileConfig::default(), |_| None)
    }
}

impl WatcherConfig {
    /// Merges env over file over built-in defaults.
    pub fn from_sources<F>(file_config: FileConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unparseable env numbers fall through to the file value.
        let parsed = |key: &str| lookup(key).and_then(|value| value.trim().parse::<u64>().ok());

        let event_id = lookup("EVENT_ID")
            .or(file_config.event_id)
            .unwrap_or_else(|| DEFAULT_EVENT_ID.to_string());
        let graphql_url = lookup("GRAPHQL_URL")
            .or(file_config.graphql_url)
            .unwrap_or_else(|| DEFAULT_GRAPHQL_URL.to_string());
        let event_page_url = lookup("EVENT_PAGE_URL")
            .or(file_config.event_page_url)
            // Page follows the event unless overridden.
            .unwrap_or_else(|| event_page_for(&event_id));
        let poll_interval = parsed("POLL_INTERVAL_SECS")
            .or(file_config.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(1);
        let rate_limit_fallback = parsed("RATE_LIMIT_FALLBACK_SECS")
            .or(file_config.rate_limit_fallback_secs)
            .unwrap_or(DEFAULT_RATE_LIMIT_FALLBACK_SECS)
            .max(1);
        let limit = lookup("REGISTRATION_LIMIT")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .or(file_config.limit)
            .unwrap_or(DEFAULT_LIMIT);
        let sound_check = lookup("SOUND_CHECK")
            .map(|value| value.trim() != "0")
            .or(file_config.sound_check)
            .unwrap_or(true);

        Self {
            event_id,
            graphql_url,
            event_page_url,
            poll_interval: Duration::from_secs(poll_interval),
            rate_limit_fallback: Duration::from_secs(rate_limit_fallback),
            limit,
            sound_check,
        }
    }
}

pub fn event_page_for(event_id: &str) -> String {
    format!("https://atleta.cc/e/{event_id}/resale")
}

fn resolve_config_path() -> PathBuf {
    if let Ok(path) = env::var("WATCHER_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    let repo_path = PathBuf::from("client/watcher/config.toml");
    if repo_path.exists() {
        return repo_path;
    }

    PathBuf::from("config.toml")
}

pub fn parse_file_config(content: &str) -> Result<FileConfig, WatchError> {
    toml::from_str::<FileConfig>(content).map_err(|err| WatchError::Config(format!("parse: {err}")))
}

pub fn load_config() -> Result<WatcherConfig, WatchError> {
    let config_path = resolve_config_path();

    let file_config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|err| WatchError::Config(format!("read {}: {err}", config_path.display())))?;
        parse_file_config(&content)?
    } else {
        FileConfig::default()
    };

    Ok(WatcherConfig::from_sources(file_config, |key| {
        env::var(key).ok()
    }))
}
