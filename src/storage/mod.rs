//! # Object Storage Module
//!
//! Archived assets and exported item files are written through the
//! [`StorageBackend`] trait. Concrete backends are chosen by the scheme of a
//! store URI (`b2://bucket/prefix`, `file:///var/archive`) through a
//! [`BackendRegistry`], resolved once when a run starts.
//!
//! ## Key Components
//!
//! - `StorageBackend`: persist and stat objects by key
//! - `StoreUri`: parsed `scheme://bucket/prefix` location
//! - `BackendRegistry`: scheme to factory mapping, fails fast on unknown schemes
//! - `B2Store`, `FsStore`, `MemoryStore`: the bundled backends
//!
//! Every persist is all-or-nothing: a reader never observes a partially
//! written object.

mod b2;
mod error;
mod fs;
mod memory;

pub use b2::{B2Store, DEFAULT_B2_ENDPOINT};
pub use error::StorageError;
pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

type Result<T> = std::result::Result<T, StorageError>;

/// Result of a successful persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistReceipt {
    /// Full key of the stored object, including the store prefix
    pub key: String,

    /// Number of bytes stored
    pub byte_size: u64,
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub byte_size: u64,
}

/// A place objects can be written to.
///
/// Implementations are shared by every concurrent persist of a run and must
/// be safe to call from many tasks at once.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `bytes` under `path`, relative to the store prefix
    async fn persist(&self, path: &str, bytes: Vec<u8>) -> Result<PersistReceipt>;

    /// Look up an object; `None` if it does not exist
    async fn stat(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// Credentials and endpoints handed to backend factories
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// B2 API endpoint used for account authorization
    pub b2_endpoint: String,

    /// B2 application key id
    pub b2_key_id: Option<String>,

    /// B2 application key
    pub b2_application_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            b2_endpoint: DEFAULT_B2_ENDPOINT.to_string(),
            b2_key_id: None,
            b2_application_key: None,
        }
    }
}

/// A parsed store URI.
///
/// For `file://` URIs `bucket` holds the directory and `prefix` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    pub scheme: String,
    pub bucket: String,
    pub prefix: Option<String>,
}

impl StoreUri {
    /// Parse `scheme://bucket[/prefix...]`
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }

        if scheme == "file" {
            return Ok(Self {
                scheme: scheme.to_string(),
                bucket: rest.to_string(),
                prefix: None,
            });
        }

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, Some(prefix.trim_matches('/'))),
            None => (rest, None),
        };
        if bucket.is_empty() {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }
}

/// Join a store prefix and a relative object path
pub fn object_key(prefix: Option<&str>, path: &str) -> String {
    let path = path.trim_start_matches('/');
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, path),
        None => path.to_string(),
    }
}

/// Constructs a backend for a parsed URI
pub type BackendFactory =
    fn(StoreUri, StorageConfig) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>>;

/// Maps URI schemes to backend factories
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    /// Registry with the `b2` and `file` backends
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("b2", open_b2);
        registry.register("file", open_fs);
        registry
    }
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `scheme`
    pub fn register(&mut self, scheme: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Resolve `uri` and construct its backend.
    ///
    /// Any failure here means the run cannot store anything and must abort.
    pub async fn open(&self, uri: &str, config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
        let parsed = StoreUri::parse(uri)?;
        let factory = self
            .factories
            .get(&parsed.scheme)
            .ok_or_else(|| StorageError::UnknownScheme(parsed.scheme.clone()))?;
        let backend = factory(parsed, config.clone()).await?;
        info!("Opened storage backend for {}", uri);
        Ok(backend)
    }
}

fn open_b2(uri: StoreUri, config: StorageConfig) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>> {
    async move {
        let store = B2Store::connect(&uri, &config).await?;
        Ok(Arc::new(store) as Arc<dyn StorageBackend>)
    }
    .boxed()
}

fn open_fs(uri: StoreUri, _config: StorageConfig) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>> {
    async move {
        let store = FsStore::create(&uri.bucket).await?;
        Ok(Arc::new(store) as Arc<dyn StorageBackend>)
    }
    .boxed()
}
