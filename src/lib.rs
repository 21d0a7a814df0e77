//! # ptt-archiver - Board Crawl and Archive Pipeline
//!
//! This crate crawls a PTT-style bulletin board, extracts structured posts
//! from its detail pages, and archives the images those posts reference into
//! object storage. A separate batch exporter moves the items of finished
//! crawl jobs from a job queue into the same storage as compressed JSON
//! lines.
//!
//! ## Features
//!
//! - Budgeted, newest-first traversal of listing pages with bounded concurrency
//! - Pure extraction of title, author, timestamp, body, comments and image links
//! - Asset archiving with MD5 checksums and optional Fernet encryption
//! - Storage backends selected by URI scheme (`b2://`, `file://`)
//! - Job export to gzip JSON lines with upload-gated deletion
//! - Async API with Tokio and structured logging with `tracing`
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use ptt_archiver::crawler::{CrawlController, CrawlerConfig, Fetcher, HttpFetcher, board_url};
//! use ptt_archiver::pipeline::{AssetPipeline, PipelineConfigBuilder};
//! use ptt_archiver::storage::{BackendRegistry, StorageConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CrawlerConfig::builder().max_pages(3).build();
//!     let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config)?);
//!
//!     let pipeline_config = PipelineConfigBuilder::new()
//!         .with_files_store("file:///tmp/beauty")
//!         .build();
//!     let pipeline = AssetPipeline::open(
//!         &pipeline_config,
//!         &StorageConfig::default(),
//!         &BackendRegistry::default(),
//!         fetcher.clone(),
//!     )
//!     .await?;
//!
//!     let controller = CrawlController::new(fetcher, config)?;
//!     let seeds = vec![board_url("Beauty").parse()?];
//!     let mut archived = Box::pin(pipeline.archive(controller.run(seeds)));
//!     while let Some(post) = archived.next().await {
//!         println!("{} ({} images)", post.record.title(), post.files.len());
//!     }
//!     Ok(())
//! }
//! ```

mod error;

pub mod crawler;
pub mod export;
pub mod pipeline;
pub mod settings;
pub mod shutdown;
pub mod storage;

pub use error::{Error, Result};

/// Re-export of types module for public use
pub mod prelude {
    pub use crate::crawler::{CrawlController, CrawlerConfig, Fetcher, Record};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::pipeline::{ArchivedRecord, AssetPipeline, AssetReceipt};
    pub use crate::storage::{BackendRegistry, StorageBackend};
}
