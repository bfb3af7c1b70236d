//! Runtime configuration for client shells
//!
//! Values are safe-to-ship public endpoints; secret credentials never
//! live here. Shells resolve a config from the environment at startup
//! and hand it to the constructors of the pieces they wire together.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

/// Environment variable naming the API base URL
pub const API_URL_ENV: &str = "BLIGHT_API_URL";
/// Environment variable overriding the local database path
pub const DB_PATH_ENV: &str = "BLIGHT_DB_PATH";

/// Client configuration shared by the shells
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of the Blight backend, e.g. `https://api.example.com/api`
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Local database file; `None` lets the shell pick its data dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Settle delay before a reconnect-triggered sync cycle
    #[serde(default)]
    pub settle_delay_secs: Option<u64>,
}

impl Config {
    /// Resolve a config from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_base_url: normalize_text_option(std::env::var(API_URL_ENV).ok()),
            database_path: normalize_text_option(std::env::var(DB_PATH_ENV).ok())
                .map(PathBuf::from),
            settle_delay_secs: None,
        }
    }

    /// The API base URL, validated
    pub fn api_base_url(&self) -> Result<&str, &'static str> {
        let url = self
            .api_base_url
            .as_deref()
            .ok_or("API base URL is not configured")?;
        if is_http_url(url) {
            Ok(url)
        } else {
            Err("API base URL must include http:// or https://")
        }
    }

    /// Settle delay for the reconnect watcher
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay_secs
            .map_or(crate::sync::DEFAULT_SETTLE_DELAY, Duration::from_secs)
    }
}
