//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::BoardSelectors;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling and retry policy
    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Primary RPC endpoint
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Scraping fallback
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Connectivity probe settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Local storage location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.updater.base_interval_secs == 0 {
            return Err(AppError::validation("updater.base_interval_secs must be > 0"));
        }
        if self.updater.max_attempts == 0 {
            return Err(AppError::validation("updater.max_attempts must be > 0"));
        }
        if self.updater.quick_timeout_secs == 0 {
            return Err(AppError::validation("updater.quick_timeout_secs must be > 0"));
        }
        if self.updater.quick_timeout_secs >= self.updater.full_timeout_secs {
            return Err(AppError::validation(
                "updater.quick_timeout_secs must be shorter than updater.full_timeout_secs",
            ));
        }
        if self.remote.endpoint.trim().is_empty() {
            return Err(AppError::validation("remote.endpoint is empty"));
        }
        if self.remote.user_agent.trim().is_empty() {
            return Err(AppError::validation("remote.user_agent is empty"));
        }
        if self.fallback.max_pages == 0 {
            return Err(AppError::validation("fallback.max_pages must be > 0"));
        }
        if self.fallback.max_concurrent == 0 {
            return Err(AppError::validation("fallback.max_concurrent must be > 0"));
        }
        if self.network.refresh_secs == 0 {
            return Err(AppError::validation("network.refresh_secs must be > 0"));
        }
        for board in &self.fallback.boards {
            if !board.url.contains("{page}") {
                return Err(AppError::validation(format!(
                    "fallback board '{}' url has no {{page}} placeholder",
                    board.id
                )));
            }
        }
        Ok(())
    }
}

/// Scheduling and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Master switch for automatic updates
    #[serde(default = "defaults::enabled")]
    pub auto_update_enabled: bool,

    /// Minimum time between updates; 8x this selects a full update
    #[serde(default = "defaults::base_interval")]
    pub base_interval_secs: u64,

    /// Whether the scraping fallback may run on a metered connection
    #[serde(default)]
    pub allow_fallback_on_metered: bool,

    /// Attempts against the remote channel before giving up on it
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// RPC timeout for a quick update
    #[serde(default = "defaults::quick_timeout")]
    pub quick_timeout_secs: u64,

    /// RPC timeout for a full update
    #[serde(default = "defaults::full_timeout")]
    pub full_timeout_secs: u64,
}

impl UpdaterConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            auto_update_enabled: defaults::enabled(),
            base_interval_secs: defaults::base_interval(),
            allow_fallback_on_metered: false,
            max_attempts: defaults::max_attempts(),
            quick_timeout_secs: defaults::quick_timeout(),
            full_timeout_secs: defaults::full_timeout(),
        }
    }
}

/// Primary RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// URL the `getPosts` call is posted to
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            user_agent: defaults::user_agent(),
        }
    }
}

/// Scraping fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Page limit per board
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Boards scraped at the same time
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Per-page request timeout in seconds
    #[serde(default = "defaults::page_timeout")]
    pub timeout_secs: u64,

    /// Boards to scrape
    #[serde(default)]
    pub boards: Vec<BoardConfig>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: defaults::request_delay(),
            max_pages: defaults::max_pages(),
            max_concurrent: defaults::max_concurrent(),
            timeout_secs: defaults::page_timeout(),
            boards: Vec::new(),
        }
    }
}

/// A single board the fallback can scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Board identifier, stored on each post
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// List page URL with a `{page}` placeholder (1-based)
    pub url: String,

    /// Included in quick updates
    #[serde(default)]
    pub common: bool,

    /// chrono format of the date column
    #[serde(default = "defaults::date_format")]
    pub date_format: String,

    #[serde(default)]
    pub selectors: BoardSelectors,
}

impl BoardConfig {
    /// URL of the given list page.
    pub fn page_url(&self, page: u32) -> String {
        self.url.replace("{page}", &page.to_string())
    }
}

/// Connectivity probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// `host:port` reached to decide whether we are online; none means always online
    #[serde(default)]
    pub probe_addr: Option<String>,

    #[serde(default = "defaults::probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Seconds between background connectivity checks
    #[serde(default = "defaults::refresh_interval")]
    pub refresh_secs: u64,

    /// Treat the current connection as metered
    #[serde(default)]
    pub metered: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_addr: None,
            probe_timeout_ms: defaults::probe_timeout(),
            refresh_secs: defaults::refresh_interval(),
            metered: false,
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `posts.json` and `watermark.json`
    #[serde(default = "defaults::storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Updater defaults
    pub fn enabled() -> bool {
        true
    }
    pub fn base_interval() -> u64 {
        600
    }
    pub fn max_attempts() -> u32 {
        10
    }
    pub fn quick_timeout() -> u64 {
        15
    }
    pub fn full_timeout() -> u64 {
        50
    }

    // Remote defaults
    pub fn endpoint() -> String {
        "http://localhost:8080/getter".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; post-updater/0.1)".into()
    }

    // Fallback defaults
    pub fn request_delay() -> u64 {
        100
    }
    pub fn max_pages() -> u32 {
        5
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn page_timeout() -> u64 {
        30
    }
    pub fn date_format() -> String {
        "%Y-%m-%d".into()
    }

    // Network defaults
    pub fn probe_timeout() -> u64 {
        1500
    }
    pub fn refresh_interval() -> u64 {
        30
    }

    // Storage / logging defaults
    pub fn storage_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_quick_timeout_not_below_full() {
        let mut config = Config::default();
        config.updater.quick_timeout_secs = 50;
        config.updater.full_timeout_secs = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.updater.base_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_network_refresh() {
        let mut config = Config::default();
        config.network.refresh_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_board_without_page_placeholder() {
        let mut config = Config::default();
        config.fallback.boards.push(BoardConfig {
            id: "notice".into(),
            name: "Notices".into(),
            url: "https://example.com/list".into(),
            common: true,
            date_format: "%Y-%m-%d".into(),
            selectors: BoardSelectors::default(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [updater]
            base_interval_secs = 60
            allow_fallback_on_metered = true

            [[fallback.boards]]
            id = "notice"
            url = "https://example.com/list?page={page}"
            common = true

            [fallback.boards.selectors]
            row_selector = "tr.row"
            title_selector = "td.title a"
            date_selector = "td.date"
            "#,
        )
        .unwrap();

        assert!(config.updater.auto_update_enabled);
        assert_eq!(config.updater.base_interval(), Duration::from_secs(60));
        assert!(config.updater.allow_fallback_on_metered);
        assert_eq!(config.updater.max_attempts, 10);
        assert_eq!(config.fallback.boards.len(), 1);
        assert_eq!(config.fallback.boards[0].selectors.attr_name, "href");
        assert_eq!(
            config.fallback.boards[0].page_url(3),
            "https://example.com/list?page=3"
        );
        assert!(config.validate().is_ok());
    }
}
