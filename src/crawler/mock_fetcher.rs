//! # Mock Fetcher for Testing
//!
//! Provides a `MockFetcher` that serves predefined documents from memory and
//! records every URL it was asked for, so traversal and pipeline behavior can
//! be exercised without network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::crawler::{FetchError, Fetcher};

/// An in-memory fetcher. Unknown URLs answer with [`FetchError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    documents: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    /// Creates an empty mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), body.into());
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.as_str() == url).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        let body = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();
        body.ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
