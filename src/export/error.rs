//! Error types for the export module

use crate::error::Error as CrateError;
use crate::storage::StorageError;
use thiserror::Error;

/// Error type for job queue operations
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Job queue API returned an error response
    #[error("Job queue API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Response body could not be decoded
    #[error("Invalid job queue response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Item stream broke off or held an oversized line
    #[error("Reading items failed: {0}")]
    Read(#[from] tokio_util::codec::LinesCodecError),
}

/// Failure exporting a single job
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Queue(#[from] JobQueueError),

    /// Upload of the archive failed; the job is kept
    #[error("Upload failed: {0}")]
    Upload(#[from] StorageError),

    /// Items could not be serialized or compressed
    #[error("Encoding failed: {0}")]
    Encode(#[from] std::io::Error),

    /// Job was listed as finished but could not be retrieved
    #[error("Job {0} not found")]
    MissingJob(String),
}

impl From<JobQueueError> for CrateError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::Http(e) => CrateError::Http(e),
            _ => CrateError::Export(err.to_string()),
        }
    }
}

impl From<ExportError> for CrateError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Upload(e) => e.into(),
            _ => CrateError::Export(err.to_string()),
        }
    }
}
