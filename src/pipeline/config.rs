//! # Pipeline Configuration Module
//!
//! Configuration for the asset pipeline: where archived files go, whether
//! they are encrypted, and how much work may be in flight at once.
//!
//! ## Key Components
//!
//! - `PipelineConfig`: complete configuration for the asset pipeline
//! - `PipelineConfigBuilder`: builder pattern implementation for easier configuration

/// Default number of assets downloaded and stored concurrently
pub const DEFAULT_ASSET_CONCURRENCY: usize = 8;

/// Default number of records whose assets may be in flight at once
pub const DEFAULT_MAX_PENDING_RECORDS: usize = 16;

/// Configuration for the asset pipeline
#[derive(Clone)]
pub struct PipelineConfig {
    /// Store URI for archived files, e.g. `b2://bucket/files` or `file:///srv/archive`
    pub files_store: String,

    /// Fernet key; `None` stores files as downloaded
    pub encryption_key: Option<String>,

    /// Maximum assets being fetched or persisted at the same time
    pub asset_concurrency: usize,

    /// Maximum records waiting on their assets before the record stream is paused
    pub max_pending_records: usize,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("files_store", &self.files_store)
            .field("encrypted", &self.encryption_key.is_some())
            .field("asset_concurrency", &self.asset_concurrency)
            .field("max_pending_records", &self.max_pending_records)
            .finish()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            files_store: "file://files".to_string(),
            encryption_key: None,
            asset_concurrency: DEFAULT_ASSET_CONCURRENCY,
            max_pending_records: DEFAULT_MAX_PENDING_RECORDS,
        }
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// Set the store URI for archived files
    pub fn with_files_store(mut self, files_store: impl Into<String>) -> Self {
        self.config.files_store = files_store.into();
        self
    }

    /// Encrypt archived files with this Fernet key
    pub fn with_encryption_key(mut self, key: Option<String>) -> Self {
        self.config.encryption_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Set the asset concurrency; at least one
    pub fn with_asset_concurrency(mut self, concurrency: usize) -> Self {
        self.config.asset_concurrency = concurrency.max(1);
        self
    }

    /// Set how many records may wait on their assets; at least one
    pub fn with_max_pending_records(mut self, max_pending: usize) -> Self {
        self.config.max_pending_records = max_pending.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
