//! # Crawler Configuration Module
//!
//! Options for the board traversal: the listing-page budget, detail fetch
//! concurrency, politeness settings, and the asset filter applied by the
//! record extractor. Uses the builder pattern.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: The main configuration struct with crawler parameters
//! - `CrawlerConfigBuilder`: Builder pattern implementation for easier configuration
//! - `AssetPolicy`: Whether records without qualifying images are published

use std::time::Duration;

/// URL template for a board's newest listing page
pub const BOARD_URL_FORMAT: &str = "https://www.ptt.cc/bbs/{board}/index.html";

/// Build the seed listing URL for a board name
pub fn board_url(board: &str) -> String {
    BOARD_URL_FORMAT.replace("{board}", board)
}

/// Publication policy for records whose filtered asset list is empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssetPolicy {
    /// Drop records with no qualifying asset URL
    #[default]
    RequireAssets,

    /// Emit every structurally valid record
    EmitAll,
}

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum number of listing pages visited per seed
    pub max_pages: u32,

    /// Maximum number of detail pages fetched concurrently
    pub detail_concurrency: usize,

    /// Minimum delay in milliseconds between requests
    pub rate_limit_ms: u64,

    /// User agent to use for requests
    pub user_agent: String,

    /// Host substring an asset link must contain
    pub asset_host: String,

    /// Allowed asset file extensions, including the dot
    pub asset_extensions: Vec<String>,

    /// What to do with records that carry no assets
    pub asset_policy: AssetPolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            detail_concurrency: 8,
            rate_limit_ms: 250,
            user_agent: format!("ptt-archiver/{}", env!("CARGO_PKG_VERSION")),
            asset_host: "imgur.com".to_string(),
            asset_extensions: vec![".jpg".to_string(), ".png".to_string()],
            asset_policy: AssetPolicy::default(),
        }
    }
}

/// Builder for CrawlerConfig
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Set the maximum number of listing pages per seed
    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Set the number of concurrent detail fetches
    pub fn detail_concurrency(mut self, detail_concurrency: usize) -> Self {
        self.config.detail_concurrency = detail_concurrency.max(1);
        self
    }

    /// Set the rate limit in milliseconds between requests
    pub fn rate_limit_ms(mut self, rate_limit_ms: u64) -> Self {
        self.config.rate_limit_ms = rate_limit_ms;
        self
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the image host asset links must point at
    pub fn asset_host(mut self, asset_host: impl Into<String>) -> Self {
        self.config.asset_host = asset_host.into();
        self
    }

    /// Set the allowed asset extensions
    pub fn asset_extensions(mut self, asset_extensions: Vec<String>) -> Self {
        self.config.asset_extensions = asset_extensions;
        self
    }

    /// Set the publication policy for records without assets
    pub fn asset_policy(mut self, asset_policy: AssetPolicy) -> Self {
        self.config.asset_policy = asset_policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Get the rate limit as a Duration
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}
