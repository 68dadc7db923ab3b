//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the sync core can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use agora_shared::constants::{
    DEFAULT_CHAT_LIMIT, DEFAULT_DEBOUNCE_MS, DEFAULT_FEED_LIMIT, DEFAULT_PAGE_SIZE,
};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite file backing the local collection store.
    /// Env: `AGORA_DB_PATH`
    /// Default: platform data directory (`None` here).
    pub db_path: Option<PathBuf>,

    /// Window during which repeated toggles on the same document collapse
    /// into one write.
    /// Env: `AGORA_DEBOUNCE_MS`
    pub debounce: Duration,

    /// Env: `AGORA_FEED_LIMIT`
    pub feed_limit: usize,

    /// Env: `AGORA_CHAT_LIMIT`
    pub chat_limit: usize,

    /// Env: `AGORA_PAGE_SIZE`
    pub page_size: usize,

    /// Image upload endpoint and key.
    /// Env: `AGORA_UPLOAD_URL`, `AGORA_UPLOAD_KEY`
    pub upload_url: Option<String>,
    pub upload_key: Option<String>,

    /// Text generation endpoint and key. Without a key the assistant always
    /// answers with the fallback reply.
    /// Env: `AGORA_TEXT_API_URL`, `AGORA_TEXT_API_KEY`
    pub text_api_url: Option<String>,
    pub text_api_key: Option<String>,

    /// Registration webhook.
    /// Env: `AGORA_WEBHOOK_URL`
    pub webhook_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            feed_limit: DEFAULT_FEED_LIMIT,
            chat_limit: DEFAULT_CHAT_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            upload_url: None,
            upload_key: None,
            text_api_url: None,
            text_api_key: None,
            webhook_url: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = non_empty(get("AGORA_DB_PATH")) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(raw) = get("AGORA_DEBOUNCE_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %raw, "Invalid AGORA_DEBOUNCE_MS, using default"),
            }
        }

        for (key, slot) in [
            ("AGORA_FEED_LIMIT", &mut config.feed_limit),
            ("AGORA_CHAT_LIMIT", &mut config.chat_limit),
            ("AGORA_PAGE_SIZE", &mut config.page_size),
        ] {
            if let Some(raw) = get(key) {
                match parse_count(&raw) {
                    Some(n) => *slot = n,
                    None => tracing::warn!(key, value = %raw, "Invalid count, using default"),
                }
            }
        }

        config.upload_url = non_empty(get("AGORA_UPLOAD_URL"));
        config.upload_key = non_empty(get("AGORA_UPLOAD_KEY"));
        config.text_api_url = non_empty(get("AGORA_TEXT_API_URL"));
        config.text_api_key = non_empty(get("AGORA_TEXT_API_KEY"));
        config.webhook_url = non_empty(get("AGORA_WEBHOOK_URL"));

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Counts must be positive; zero would make every view empty.
fn parse_count(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
