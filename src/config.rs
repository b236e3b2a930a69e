//! Configuration and settings management
//!
//! Loads settings from environment variables and defines service constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest file Telegram lets a bot send by URL, in bytes.
///
/// Streams above this size are skipped in favor of a smaller variant;
/// the full-quality URL is still kept on the descriptor.
pub const TG_FILE_LIMIT: u64 = 50 * 1000 * 1000;

/// Maximum caption length Telegram accepts on media messages.
pub const TG_CAPTION_LIMIT: usize = 1024;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Twitter API v2 bearer token; the Twitter adapter is disabled without it
    pub twitter_bearer_token: Option<String>,

    /// Reddit API client ID
    pub reddit_client_id: Option<String>,
    /// Reddit API client secret
    pub reddit_client_secret: Option<String>,
    /// User agent sent to the Reddit API
    #[serde(default = "default_reddit_user_agent")]
    pub reddit_user_agent: String,

    /// Lamadava SaaS token used as the Instagram fallback backend
    pub lamadava_saas_token: Option<String>,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Per-adapter resolution timeout in seconds
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,

    /// Hot media-cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Hot media-cache capacity (number of canonical URLs)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,

    /// Include post captions in replies ("full", "no_hashtags" or "off")
    #[serde(default = "default_caption_mode")]
    pub caption_mode: String,
    /// Append an author mention to replies
    #[serde(default)]
    pub caption_author: bool,
    /// Append a language flag emoji to replies
    #[serde(default)]
    pub caption_flag: bool,
    /// Append the original link to replies
    #[serde(default = "default_true")]
    pub caption_link: bool,
}

fn default_reddit_user_agent() -> String {
    "media relay bot".to_string()
}

const fn default_adapter_timeout_secs() -> u64 {
    4
}

const fn default_cache_ttl_secs() -> u64 {
    6 * 60 * 60
}

const fn default_cache_max_entries() -> u64 {
    10_000
}

fn default_caption_mode() -> String {
    "full".to_string()
}

const fn default_true() -> bool {
    true
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Fallback: check environment variables directly if config didn't pick them up
        for (slot, var) in [
            (&mut settings.r2_endpoint_url, "R2_ENDPOINT_URL"),
            (&mut settings.r2_access_key_id, "R2_ACCESS_KEY_ID"),
            (&mut settings.r2_secret_access_key, "R2_SECRET_ACCESS_KEY"),
            (&mut settings.r2_bucket_name, "R2_BUCKET_NAME"),
        ] {
            if slot.is_none() {
                if let Ok(val) = std::env::var(var) {
                    if !val.is_empty() {
                        *slot = Some(val);
                    }
                }
            }
        }

        Ok(settings)
    }

    /// Per-adapter resolution timeout
    #[must_use]
    pub const fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Whether the persistent R2 cache store is fully configured
    #[must_use]
    pub const fn r2_configured(&self) -> bool {
        self.r2_endpoint_url.is_some()
            && self.r2_access_key_id.is_some()
            && self.r2_secret_access_key.is_some()
            && self.r2_bucket_name.is_some()
    }
}

#[cfg(test)]
impl Settings {
    /// Bare settings for unit tests; no credentials configured.
    pub(crate) fn for_tests() -> Self {
        Self {
            telegram_token: "dummy".to_string(),
            twitter_bearer_token: None,
            reddit_client_id: None,
            reddit_client_secret: None,
            reddit_user_agent: default_reddit_user_agent(),
            lamadava_saas_token: None,
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
            adapter_timeout_secs: default_adapter_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            caption_mode: default_caption_mode(),
            caption_author: false,
            caption_flag: false,
            caption_link: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // One test body: these assertions share process-wide environment
    // variables and must not run in parallel with each other.
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("R2_ENDPOINT_URL", "https://example.com");

        let settings = Settings::new()?;
        assert_eq!(
            settings.r2_endpoint_url,
            Some("https://example.com".to_string())
        );
        assert!(!settings.r2_configured());
        assert_eq!(settings.adapter_timeout(), Duration::from_secs(4));

        env::remove_var("R2_ENDPOINT_URL");

        // Empty env vars are treated as unset
        env::set_var("TWITTER_BEARER_TOKEN", "");
        let settings = Settings::new()?;
        assert_eq!(settings.twitter_bearer_token, None);
        env::remove_var("TWITTER_BEARER_TOKEN");

        // Defaults
        let settings = Settings::new()?;
        assert_eq!(settings.caption_mode, "full");
        assert!(settings.caption_link);
        assert!(!settings.caption_author);
        assert_eq!(settings.cache_max_entries, 10_000);

        env::remove_var("TELEGRAM_TOKEN");
        Ok(())
    }
}
