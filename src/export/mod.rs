//! # Batch Export Module
//!
//! Moves the items of finished crawl jobs from the job queue into object
//! storage, one gzip-compressed JSON lines file per job, and optionally
//! deletes each job once its archive is safely uploaded.
//!
//! ## Key Components
//!
//! - `JobQueue` / `Job`: the job queue capability
//! - `ScrapinghubClient`: the Scrapinghub implementation of it
//! - `BatchExporter`: drives the export and reports per-spider results
//!
//! A job is only ever deleted after its upload succeeded, and a failing job
//! never stops the export of the others.

mod error;
mod scrapinghub;

pub use error::{ExportError, JobQueueError};
pub use scrapinghub::{DEFAULT_APP_URL, DEFAULT_STORAGE_URL, ScrapinghubClient, ScrapinghubJob};

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::storage::StorageBackend;

/// A finished job as listed by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Job key, e.g. `123/1/4`
    pub key: String,

    /// Number of items the job produced
    pub item_count: u64,
}

/// A crawl job queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Finished jobs of `spider`
    async fn list_finished_jobs(&self, spider: &str) -> Result<Vec<JobSummary>, JobQueueError>;

    /// Look up a job by key; `None` if it no longer exists
    async fn get_job(&self, key: &str) -> Result<Option<Box<dyn Job>>, JobQueueError>;
}

/// One job of a [`JobQueue`]
#[async_trait]
pub trait Job: Send + Sync {
    fn key(&self) -> &str;

    /// The job's items, streamed in order
    fn items(&self) -> BoxStream<'_, Result<Value, JobQueueError>>;

    async fn delete(&self) -> Result<(), JobQueueError>;
}

/// Export results for one spider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpiderSummary {
    pub name: String,

    /// Jobs uploaded successfully
    pub jobs_exported: usize,

    /// Jobs deleted after upload
    pub jobs_deleted: usize,

    /// Jobs (or listings) that failed
    pub failures: usize,
}

/// Export results for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub spiders: Vec<SpiderSummary>,
}

impl ExportSummary {
    pub fn jobs_exported(&self) -> usize {
        self.spiders.iter().map(|s| s.jobs_exported).sum()
    }

    pub fn failures(&self) -> usize {
        self.spiders.iter().map(|s| s.failures).sum()
    }
}

/// Object key of a job archive, relative to the store prefix
pub fn archive_key(spider: &str, job_key: &str) -> String {
    format!("{}/{}.jl.gz", spider, job_key.replace('/', "-"))
}

/// Gzip-compressed JSON lines, written one item at a time
pub struct JsonLinesEncoder {
    encoder: GzEncoder<Vec<u8>>,
    items: usize,
}

impl JsonLinesEncoder {
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
            items: 0,
        }
    }

    /// Append one item as a line
    pub fn push(&mut self, item: &Value) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.encoder, item)?;
        self.encoder.write_all(b"\n")?;
        self.items += 1;
        Ok(())
    }

    /// Number of items written so far
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Finish the gzip stream and return the compressed bytes
    pub fn finish(self) -> std::io::Result<Vec<u8>> {
        self.encoder.finish()
    }
}

impl Default for JsonLinesEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode items as gzip-compressed JSON lines
pub fn encode_items<'a, I>(items: I) -> std::io::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut encoder = JsonLinesEncoder::new();
    for item in items {
        encoder.push(item)?;
    }
    encoder.finish()
}

/// Copies finished jobs from a queue into a store
pub struct BatchExporter {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn StorageBackend>,
}

impl BatchExporter {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn StorageBackend>) -> Self {
        Self { queue, store }
    }

    /// Export every finished, non-empty job of each spider.
    ///
    /// With `delete_after_upload`, a job is deleted right after its archive
    /// was uploaded, and never otherwise.
    #[instrument(skip(self))]
    pub async fn export(&self, spiders: &[String], delete_after_upload: bool) -> ExportSummary {
        let mut summary = ExportSummary::default();
        for spider in spiders {
            summary
                .spiders
                .push(self.export_spider(spider, delete_after_upload).await);
        }
        info!(
            exported = summary.jobs_exported(),
            failures = summary.failures(),
            "Export finished"
        );
        summary
    }

    async fn export_spider(&self, spider: &str, delete_after_upload: bool) -> SpiderSummary {
        let mut summary = SpiderSummary {
            name: spider.to_string(),
            ..SpiderSummary::default()
        };

        let jobs = match self.queue.list_finished_jobs(spider).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(spider, "Could not list jobs: {}", e);
                summary.failures += 1;
                return summary;
            }
        };

        for job in jobs.into_iter().filter(|job| job.item_count > 0) {
            match self.export_job(spider, &job.key, delete_after_upload).await {
                Ok(deleted) => {
                    summary.jobs_exported += 1;
                    if deleted {
                        summary.jobs_deleted += 1;
                    }
                }
                Err(e) => {
                    warn!(spider, job = %job.key, "Job export failed: {}", e);
                    summary.failures += 1;
                }
            }
        }

        info!(
            spider,
            exported = summary.jobs_exported,
            deleted = summary.jobs_deleted,
            failures = summary.failures,
            "Spider exported"
        );
        summary
    }

    /// Upload one job; returns whether it was deleted afterwards.
    ///
    /// A failed delete after a successful upload is reported as an error.
    #[instrument(skip(self))]
    async fn export_job(
        &self,
        spider: &str,
        key: &str,
        delete_after_upload: bool,
    ) -> Result<bool, ExportError> {
        let job = self
            .queue
            .get_job(key)
            .await?
            .ok_or_else(|| ExportError::MissingJob(key.to_string()))?;

        let mut encoder = JsonLinesEncoder::new();
        let mut stream = job.items();
        while let Some(item) = stream.next().await {
            encoder.push(&item?)?;
        }
        drop(stream);

        let items = encoder.len();
        let archive = encoder.finish()?;
        let receipt = self.store.persist(&archive_key(spider, key), archive).await?;
        info!(
            monotonic_counter.jobs_exported = 1_u64,
            key = %receipt.key,
            items,
            bytes = receipt.byte_size,
            "Uploaded job archive"
        );

        if !delete_after_upload {
            return Ok(false);
        }
        job.delete().await?;
        info!("Deleted job {}", key);
        Ok(true)
    }
}
