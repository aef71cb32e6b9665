use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::DEFAULT_MAX_FILE_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub telegram_api_url: String,
    pub poll_timeout: Duration,

    // Cache
    pub download_path: PathBuf,
    pub max_file_size: u64,

    // Fetching
    pub fetch_strategy: FetchStrategy,
    pub gallery_dl_path: String,
    pub cookies_file_path: Option<PathBuf>,
    pub instagram_base_url: String,
}

/// How post media is obtained from Instagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Let gallery-dl resolve and download every asset.
    GalleryDl,
    /// Query the public GraphQL endpoint and pull each asset URL ourselves.
    Direct,
}

impl FetchStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GalleryDl => "gallery-dl",
            Self::Direct => "direct",
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Telegram
            bot_token: required_env("BOT_TOKEN")?,
            telegram_api_url: env_or_default("TELEGRAM_API_URL", "https://api.telegram.org"),
            poll_timeout: Duration::from_secs(parse_env_u64("POLL_TIMEOUT_SECS", 30)?),

            // Cache
            download_path: PathBuf::from(env_or_default("DOWNLOAD_PATH", "downloads")),
            max_file_size: parse_env_u64("MAX_FILE_SIZE_BYTES", DEFAULT_MAX_FILE_SIZE)?,

            // Fetching
            fetch_strategy: parse_fetch_strategy(&env_or_default("FETCH_STRATEGY", "gallery-dl"))?,
            gallery_dl_path: env_or_default("GALLERY_DL_PATH", "gallery-dl"),
            cookies_file_path: optional_env("COOKIES_FILE_PATH").map(PathBuf::from),
            instagram_base_url: env_or_default("INSTAGRAM_BASE_URL", "https://www.instagram.com"),
        })
    }

    /// Configuration with harmless defaults, for tests.
    #[doc(hidden)]
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            bot_token: "test-token".to_string(),
            telegram_api_url: "http://127.0.0.1:9".to_string(),
            poll_timeout: Duration::from_secs(1),
            download_path: PathBuf::from("./downloads"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            fetch_strategy: FetchStrategy::Direct,
            gallery_dl_path: "gallery-dl".to_string(),
            cookies_file_path: None,
            instagram_base_url: "http://127.0.0.1:9".to_string(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BOT_TOKEN".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_FILE_SIZE_BYTES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_fetch_strategy(value: &str) -> Result<FetchStrategy, ConfigError> {
    match value.to_lowercase().as_str() {
        "gallery-dl" | "gallerydl" => Ok(FetchStrategy::GalleryDl),
        "direct" => Ok(FetchStrategy::Direct),
        _ => Err(ConfigError::InvalidValue {
            name: "FETCH_STRATEGY".to_string(),
            message: format!("must be 'gallery-dl' or 'direct', got '{value}'"),
        }),
    }
}
