//! Configuration and settings management
//!
//! Loads settings from environment variables and defines runtime constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Owner of the bot; always authorized, the only one allowed to run admin commands
    pub sudo_user: i64,

    /// Comma-separated list of additionally allowed user IDs
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Base URL of the media resolution API
    #[serde(default = "default_media_api_base")]
    pub media_api_base: String,

    /// Flat directory holding hash-named media files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding one sandbox subdirectory per worker
    #[serde(default = "default_workers_dir")]
    pub workers_dir: PathBuf,

    /// JSON file persisting the worker registry
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,

    /// Text file persisting authorized user IDs
    #[serde(default = "default_auth_file")]
    pub auth_file: PathBuf,

    /// Interpreter used to run worker scripts and install packages
    #[serde(default = "default_worker_interpreter")]
    pub worker_interpreter: String,

    /// Bot API server URL; a self-hosted server lifts the upload limit to the tier ceiling
    pub bot_api_url: Option<String>,

    /// Explicit account tier (`standard` or `premium`); detected at startup when unset
    pub account_tier: Option<AccountTier>,
}

fn default_media_api_base() -> String {
    "http://35.221.9.111:9200/download".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_workers_dir() -> PathBuf {
    PathBuf::from("workers")
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("workers.json")
}

fn default_auth_file() -> PathBuf {
    PathBuf::from("auth_users.txt")
}

fn default_worker_interpreter() -> String {
    "python3".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oxide_courier::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, never checked in
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__CACHE_DIR=/tmp/media ./target/oxide-courier`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Bare UPPER_SNAKE_CASE variables map onto snake_case keys; empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the set of Telegram IDs allowed by configuration (sudo user included)
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        let mut users: HashSet<i64> = self
            .allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default();
        users.insert(self.sudo_user);
        users
    }
}

/// Account tier of the bot identity; decides the upload size ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    /// Regular account (2 GiB uploads)
    Standard,
    /// Elevated account (4 GiB uploads)
    Premium,
}

impl AccountTier {
    /// Largest artifact, in bytes, this tier may deliver
    #[must_use]
    pub const fn max_file_size(self) -> u64 {
        match self {
            Self::Standard => STANDARD_MAX_FILE_SIZE,
            Self::Premium => PREMIUM_MAX_FILE_SIZE,
        }
    }
}

// Media pipeline
/// Upload ceiling for a standard account (2 GiB)
pub const STANDARD_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
/// Upload ceiling for a premium account (4 GiB)
pub const PREMIUM_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;
/// Minimum gap between two progress edits
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
/// Telegram caption length limit
pub const CAPTION_LIMIT: usize = 1024;
/// How long the "done" marker stays before it is removed
pub const DONE_MARKER_LINGER: Duration = Duration::from_secs(1);
/// Connect timeout for media HTTP requests
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Idle timeout between two reads of a media download
pub const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(60);

// Workers
/// Pause between terminating a worker and respawning it on restart
pub const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Timeout for installing a package into a worker
pub const PACKAGE_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
/// File inside each sandbox receiving the script's combined output
pub const WORKER_LOG_FILE: &str = "worker.log";

// Shell
/// Timeout for confirmed shell commands
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(60);
/// Pending shell commands are forgotten after this long
pub const SHELL_CONFIRM_TTL: Duration = Duration::from_secs(600);

// Telegram
/// Longest command output sent inline; anything larger goes out as a document
pub const OUTPUT_INLINE_LIMIT: usize = 4000;
/// Max retry attempts for Telegram API calls
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Max backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_settings() -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            sudo_user: 1,
            allowed_users_str: None,
            media_api_base: default_media_api_base(),
            cache_dir: default_cache_dir(),
            workers_dir: default_workers_dir(),
            registry_file: default_registry_file(),
            auth_file: default_auth_file(),
            worker_interpreter: default_worker_interpreter(),
            bot_api_url: None,
            account_tier: None,
        }
    }

    #[test]
    fn test_list_parsing_includes_sudo() {
        let mut settings = bare_settings();

        settings.allowed_users_str = Some("123,456".to_string());
        let allowed = settings.allowed_users();
        assert!(allowed.contains(&123));
        assert!(allowed.contains(&456));
        assert!(allowed.contains(&1));
        assert_eq!(allowed.len(), 3);

        settings.allowed_users_str = Some("333; 444 abc".to_string());
        let allowed = settings.allowed_users();
        assert!(allowed.contains(&333));
        assert!(allowed.contains(&444));
        assert_eq!(allowed.len(), 3);

        settings.allowed_users_str = None;
        assert_eq!(settings.allowed_users().len(), 1);
    }

    #[test]
    fn test_tier_limits() {
        assert_eq!(AccountTier::Standard.max_file_size(), 2_147_483_648);
        assert_eq!(AccountTier::Premium.max_file_size(), 4_294_967_296);
    }

    #[test]
    fn test_tier_deserializes_lowercase() -> Result<(), Box<dyn std::error::Error>> {
        let tier: AccountTier = serde_json::from_str("\"premium\"")?;
        assert_eq!(tier, AccountTier::Premium);
        Ok(())
    }

    #[test]
    fn test_optional_settings_default_to_none() -> Result<(), Box<dyn std::error::Error>> {
        let settings: Settings =
            serde_json::from_str(r#"{"telegram_token": "t", "sudo_user": 7}"#)?;
        assert_eq!(settings.bot_api_url, None);
        assert_eq!(settings.account_tier, None);
        assert_eq!(settings.cache_dir, default_cache_dir());
        assert_eq!(settings.worker_interpreter, "python3");

        let premium: Settings = serde_json::from_str(
            r#"{"telegram_token": "t", "sudo_user": 7, "bot_api_url": "http://localhost:8081", "account_tier": "premium"}"#,
        )?;
        assert_eq!(premium.bot_api_url.as_deref(), Some("http://localhost:8081"));
        assert_eq!(premium.account_tier, Some(AccountTier::Premium));
        Ok(())
    }
}
