use crate::sponsor::SkipCategory;
use crate::{FeedlineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the feed ingestion and chapter engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Feed fetching settings
    pub feeds: FeedConfig,

    /// Chapter merging and caching settings
    pub chapters: ChapterConfig,

    /// Sponsor segment provider settings
    pub sponsor: SponsorConfig,

    /// Playback tracking settings
    pub playback: PlaybackConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,

    /// User agent sent with feed requests
    pub user_agent: String,

    /// Maximum number of feeds fetched at the same time
    pub max_concurrent_fetches: usize,

    /// Maximum number of items taken from a single feed (None = all)
    pub item_limit: Option<usize>,

    /// Drop items classified as shorts
    pub hide_shorts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterConfig {
    /// Merge sponsor segments into chapter timelines
    pub merge_sponsor_chapters: bool,

    /// Sponsor categories that become skipped chapters
    pub skip_categories: Vec<SkipCategory>,

    /// Hours before a merged timeline is refreshed from the provider
    pub sponsor_refresh_hours: u64,

    /// Directory for persisted timelines
    pub store_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorConfig {
    /// Base URL of the segment database
    pub endpoint: String,

    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Categories requested from the segment database
    pub categories: Vec<SkipCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Seconds into a chapter after which "previous" restarts it
    pub previous_chapter_delay_seconds: f64,

    /// Distance from the end used when skipping a trailing sponsor segment
    pub end_skip_margin_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive
    pub level: String,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let config_paths = [
            "feedline.toml",
            "config/feedline.toml",
            "~/.config/feedline/config.toml",
            "/etc/feedline/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to defaults with environment overrides
        Self::from_env()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        toml::from_str(&config_str)
            .map_err(|e| FeedlineError::Config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(timeout) = std::env::var("FEEDLINE_REQUEST_TIMEOUT") {
            config.feeds.request_timeout_seconds = timeout.parse().unwrap_or(30);
        }

        if let Ok(fetches) = std::env::var("FEEDLINE_MAX_CONCURRENT_FETCHES") {
            config.feeds.max_concurrent_fetches = fetches.parse().unwrap_or(4);
        }

        if let Ok(hide) = std::env::var("FEEDLINE_HIDE_SHORTS") {
            config.feeds.hide_shorts = matches!(hide.as_str(), "1" | "true" | "yes");
        }

        if let Ok(endpoint) = std::env::var("FEEDLINE_SPONSOR_ENDPOINT") {
            config.sponsor.endpoint = endpoint;
        }

        if let Ok(store_dir) = std::env::var("FEEDLINE_STORE_DIR") {
            config.chapters.store_dir = PathBuf::from(store_dir);
        }

        if let Ok(log_level) = std::env::var("FEEDLINE_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| FeedlineError::Config(e.to_string()))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.feeds.max_concurrent_fetches == 0 {
            return Err(FeedlineError::Config("max_concurrent_fetches must be greater than 0".to_string()));
        }

        if self.feeds.request_timeout_seconds == 0 || self.sponsor.request_timeout_seconds == 0 {
            return Err(FeedlineError::Config("request timeouts must be greater than 0".to_string()));
        }

        if self.playback.previous_chapter_delay_seconds < 0.0 || self.playback.end_skip_margin_seconds < 0.0 {
            return Err(FeedlineError::Config("playback delays must not be negative".to_string()));
        }

        if self.chapters.merge_sponsor_chapters {
            url::Url::parse(&self.sponsor.endpoint)?;
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Feedline Configuration:\n\
            - Concurrent Fetches: {}\n\
            - Request Timeout: {}s\n\
            - Hide Shorts: {}\n\
            - Merge Sponsor Chapters: {}\n\
            - Skip Categories: {}\n\
            - Sponsor Endpoint: {}\n\
            - Store Directory: {}",
            self.feeds.max_concurrent_fetches,
            self.feeds.request_timeout_seconds,
            self.feeds.hide_shorts,
            self.chapters.merge_sponsor_chapters,
            self.chapters
                .skip_categories
                .iter()
                .map(|c| c.api_name())
                .collect::<Vec<_>>()
                .join(", "),
            self.sponsor.endpoint,
            self.chapters.store_dir.display()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: FeedConfig {
                request_timeout_seconds: 30,
                user_agent: format!("feedline/{}", env!("CARGO_PKG_VERSION")),
                max_concurrent_fetches: num_cpus::get().min(8), // Use available cores, max 8
                item_limit: None,
                hide_shorts: false,
            },
            chapters: ChapterConfig {
                merge_sponsor_chapters: true,
                skip_categories: SkipCategory::ALL.to_vec(),
                sponsor_refresh_hours: 24,
                store_dir: PathBuf::from("timelines"),
            },
            sponsor: SponsorConfig {
                endpoint: "https://sponsor.ajay.app".to_string(),
                request_timeout_seconds: 15,
                categories: SkipCategory::ALL.to_vec(),
            },
            playback: PlaybackConfig {
                previous_chapter_delay_seconds: 4.0,
                end_skip_margin_seconds: 0.5,
            },
            logging: LoggingConfig {
                level: "feedline=info,warn".to_string(),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_concurrent_fetches(mut self, fetches: usize) -> Self {
        self.config.feeds.max_concurrent_fetches = fetches;
        self
    }

    pub fn with_item_limit(mut self, limit: usize) -> Self {
        self.config.feeds.item_limit = Some(limit);
        self
    }

    pub fn hide_shorts(mut self, hide: bool) -> Self {
        self.config.feeds.hide_shorts = hide;
        self
    }

    pub fn with_skip_categories(mut self, categories: Vec<SkipCategory>) -> Self {
        self.config.chapters.skip_categories = categories;
        self
    }

    pub fn with_store_dir(mut self, dir: PathBuf) -> Self {
        self.config.chapters.store_dir = dir;
        self
    }

    pub fn with_sponsor_endpoint(mut self, endpoint: String) -> Self {
        self.config.sponsor.endpoint = endpoint;
        self
    }

    pub fn enable_sponsor_merge(mut self, enable: bool) -> Self {
        self.config.chapters.merge_sponsor_chapters = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.playback.end_skip_margin_seconds, 0.5);
        assert!(config.chapters.merge_sponsor_chapters);
        assert_eq!(config.chapters.skip_categories.len(), SkipCategory::ALL.len());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_concurrent_fetches(2)
            .with_item_limit(15)
            .hide_shorts(true)
            .with_skip_categories(vec![SkipCategory::Sponsor])
            .build();

        assert_eq!(config.feeds.max_concurrent_fetches, 2);
        assert_eq!(config.feeds.item_limit, Some(15));
        assert!(config.feeds.hide_shorts);
        assert_eq!(config.chapters.skip_categories, vec![SkipCategory::Sponsor]);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let invalid = ConfigBuilder::new().with_concurrent_fetches(0).build();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ConfigBuilder::new().hide_shorts(true).build();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert!(parsed.feeds.hide_shorts);
        assert_eq!(parsed.sponsor.endpoint, config.sponsor.endpoint);
    }
}
