//! Error types for the crawler module

use crate::error::Error as CrateError;
use thiserror::Error;

/// Error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Fetching a page failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Detail page did not yield a record
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// HTML parsing error
    #[error("HTML parsing error: {0}")]
    HtmlParse(String),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// Error returned by a [`Fetcher`](crate::crawler::Fetcher)
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP status {status} for {url}")]
    Status {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// No document is available for the URL
    #[error("Not found: {0}")]
    NotFound(String),
}

/// A required field of a detail page is missing or malformed.
///
/// The caller logs and skips the page; it is never fatal to a run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Required field is absent from the document
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Timestamp text did not match the board's format
    #[error("malformed timestamp {raw:?}: {source}")]
    MalformedTimestamp {
        /// Text found in the document
        raw: String,
        /// Underlying parse error
        source: chrono::ParseError,
    },

    /// Page body is not valid UTF-8
    #[error("document is not valid UTF-8")]
    Encoding,
}

impl From<CrawlError> for CrateError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::Fetch(FetchError::Http(e)) => CrateError::Http(e),
            CrawlError::UrlParse(e) => CrateError::Other(format!("URL parse error: {}", e)),
            _ => CrateError::Crawl(err.to_string()),
        }
    }
}
