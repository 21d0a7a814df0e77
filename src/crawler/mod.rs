//! # Board Crawler Module
//!
//! Traverses a board's listing pages newest-first, fetches every linked
//! detail page, and turns each into a [`Record`].
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: listing-page budget, concurrency, asset filter
//! - `CrawlController`: bounded traversal producing a stream of records
//! - `RecordExtractor`: pure extraction of records and listing links
//! - `Fetcher`: the page download capability, with `HttpFetcher` for the live board
//!
//! ## Usage
//!
//! The controller's record stream feeds the asset pipeline, which downloads
//! and stores each record's images.

mod config;
mod content_extraction;
mod controller;
mod error;
mod fetch;
pub mod mock_fetcher;

pub use config::{AssetPolicy, BOARD_URL_FORMAT, CrawlerConfig, CrawlerConfigBuilder, board_url};
pub use content_extraction::{
    ListingPage, RecordExtractor, TIMESTAMP_FORMAT, classify_push, filter_asset_urls,
    parse_timestamp,
};
pub use controller::{CrawlController, CrawlCursor, CrawlEvent, LineageReport, Termination};
pub use error::{CrawlError, ExtractionError, FetchError};
pub use fetch::{Fetcher, HttpFetcher};

use chrono::NaiveDateTime;
use serde::Serialize;

/// One push (comment) on a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    /// User id of the commenter
    pub user: String,

    /// Comment text as shown on the page
    pub content: String,

    /// +1 for a positive push, -1 for a negative one, 0 otherwise
    pub score: i32,
}

/// A forum post extracted from a detail page.
///
/// Records are immutable once built; `score` always equals the sum of the
/// comment scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    title: String,
    author: String,
    timestamp: NaiveDateTime,
    body: String,
    comments: Vec<Comment>,
    score: i32,
    source_url: String,
    asset_urls: Vec<String>,
}

impl Record {
    /// Build a record; the total score is derived from `comments`
    pub fn new(
        title: String,
        author: String,
        timestamp: NaiveDateTime,
        body: String,
        comments: Vec<Comment>,
        source_url: String,
        asset_urls: Vec<String>,
    ) -> Self {
        let score = comments.iter().map(|c| c.score).sum();
        Self {
            title,
            author,
            timestamp,
            body,
            comments,
            score,
            source_url,
            asset_urls,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Post body as plain text
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Comments in document order
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    /// Sum of all comment scores
    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Image URLs that passed the host and extension filter
    pub fn asset_urls(&self) -> &[String] {
        &self.asset_urls
    }

    pub fn has_assets(&self) -> bool {
        !self.asset_urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(score: i32) -> Comment {
        Comment {
            user: "u".to_string(),
            content: ": c".to_string(),
            score,
        }
    }

    #[test]
    fn test_record_score_is_comment_sum() {
        let timestamp = parse_timestamp("Sun Oct 18 09:58:01 2026").unwrap();
        let record = Record::new(
            "title".to_string(),
            "author".to_string(),
            timestamp,
            String::new(),
            vec![comment(1), comment(1), comment(-1), comment(0)],
            "https://www.ptt.cc/bbs/Beauty/M.1.A.html".to_string(),
            Vec::new(),
        );

        assert_eq!(record.score(), 1);
        assert!(!record.has_assets());
    }

    #[test]
    fn test_record_serializes_core_fields() {
        let timestamp = parse_timestamp("Sun Oct 18 09:58:01 2026").unwrap();
        let record = Record::new(
            "title".to_string(),
            "author".to_string(),
            timestamp,
            "body".to_string(),
            vec![comment(-1)],
            "https://www.ptt.cc/bbs/Beauty/M.1.A.html".to_string(),
            vec!["https://i.imgur.com/a.jpg".to_string()],
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["score"], -1);
        assert_eq!(json["timestamp"], "2026-10-18T09:58:01");
        assert_eq!(json["comments"][0]["score"], -1);
        assert_eq!(json["asset_urls"][0], "https://i.imgur.com/a.jpg");
    }
}
