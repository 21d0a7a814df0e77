//! Error types for the ptt-archiver crate

use thiserror::Error;

/// Result type for archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for archiver operations
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Web crawling error
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// Asset pipeline error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Storage backend could not be initialized; fatal for a run
    #[error("Storage initialization failed: {0}")]
    StorageInit(String),

    /// Batch export error
    #[error("Export error: {0}")]
    Export(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
