//! Error types for the storage module

use crate::error::Error as CrateError;
use std::io;
use thiserror::Error;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store URI could not be parsed
    #[error("Invalid store URI: {0}")]
    InvalidUri(String),

    /// No backend is registered for the URI scheme
    #[error("No storage backend registered for scheme `{0}`")]
    UnknownScheme(String),

    /// Backend could not be set up (credentials, endpoint, bucket)
    #[error("Could not initialize storage backend: {0}")]
    Init(String),

    /// Object key is not acceptable for the backend
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend API returned an error response
    #[error("Storage API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Backend is temporarily not accepting writes
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<StorageError> for CrateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Init(message) => CrateError::StorageInit(message),
            StorageError::UnknownScheme(_) | StorageError::InvalidUri(_) => {
                CrateError::StorageInit(err.to_string())
            }
            StorageError::Http(e) => CrateError::Http(e),
            StorageError::Io(e) => CrateError::Io(e),
            _ => CrateError::Storage(err.to_string()),
        }
    }
}
