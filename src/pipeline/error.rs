//! Error types for the asset pipeline

use crate::crawler::FetchError;
use crate::error::Error as CrateError;
use crate::storage::StorageError;
use thiserror::Error;

/// Failure of a single asset; the asset is skipped, the record is kept
#[derive(Debug, Error)]
pub enum AssetError {
    /// Download failed
    #[error("Asset fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Encryption failed
    #[error("Asset encryption failed: {0}")]
    Encrypt(#[from] CipherError),

    /// Storage backend rejected the write
    #[error("Asset persist failed: {0}")]
    Persist(#[from] StorageError),
}

/// Error type for the file cipher
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key is not a valid url-safe base64 32-byte Fernet key
    #[error("Invalid encryption key")]
    InvalidKey,

    /// Token is malformed, was made with another key, or was tampered with
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AssetError> for CrateError {
    fn from(err: AssetError) -> Self {
        CrateError::Pipeline(err.to_string())
    }
}

impl From<CipherError> for CrateError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Io(e) => CrateError::Io(e),
            CipherError::InvalidKey => CrateError::Config(err.to_string()),
            _ => CrateError::Pipeline(err.to_string()),
        }
    }
}
