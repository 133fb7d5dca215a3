//! Base config: Telegram connection, logging, storage. Loaded from env.

use std::env;
use std::fmt;
use std::str::FromStr;

use classbot_core::{ClassbotError, Result};

/// Backing store selected by STORE_TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreType::Sqlite),
            "memory" => Ok(StoreType::Memory),
            other => Err(format!("unknown store type: {}", other)),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Sqlite => f.write_str("sqlite"),
            StoreType::Memory => f.write_str("memory"),
        }
    }
}

/// Base config: Telegram-related, logging, storage only.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    /// BOT_TOKEN; only `run` needs it.
    pub bot_token: Option<String>,
    /// TELEGRAM_API_URL or TELOXIDE_API_URL
    pub telegram_api_url: Option<String>,
    /// Log file path
    pub log_file: String,
    /// SQLite database URL or path
    pub database_url: String,
    pub store_type: StoreType,
}

/// Reads `key` and parses it, falling back to `default` when unset or blank.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ClassbotError::Config(format!("{} is invalid ({}): {}", key, raw, e))),
        _ => Ok(default),
    }
}

impl BaseConfig {
    /// Load from environment variables. `token` overrides BOT_TOKEN if provided.
    pub fn load(token: Option<String>) -> Result<Self> {
        let bot_token = token
            .or_else(|| env::var("BOT_TOKEN").ok())
            .filter(|t| !t.trim().is_empty());
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./classbot.db".to_string());
        let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/classbot.log".to_string());
        let telegram_api_url = env::var("TELEGRAM_API_URL")
            .or_else(|_| env::var("TELOXIDE_API_URL"))
            .ok();
        let store_type = env_parse("STORE_TYPE", StoreType::default())?;

        Ok(Self {
            bot_token,
            telegram_api_url,
            log_file,
            database_url,
            store_type,
        })
    }

    /// Validate config (e.g. telegram_api_url must be valid URL if set).
    pub fn validate(&self) -> Result<()> {
        if let Some(ref url_str) = self.telegram_api_url {
            if reqwest::Url::parse(url_str).is_err() {
                return Err(ClassbotError::Config(format!(
                    "TELEGRAM_API_URL (or TELOXIDE_API_URL) is set but not a valid URL: {}",
                    url_str
                )));
            }
        }
        if self.store_type == StoreType::Sqlite && self.database_url.trim().is_empty() {
            return Err(ClassbotError::Config("DATABASE_URL is empty".to_string()));
        }
        Ok(())
    }

    /// The bot token, or a config error when running without one.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| ClassbotError::Config("BOT_TOKEN not set".to_string()))
    }
}
