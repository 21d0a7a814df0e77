//! # Asset Pipeline Module
//!
//! Downloads the images referenced by crawled records and archives them in a
//! storage backend, optionally encrypted.
//!
//! ## Key Components
//!
//! - `AssetPipeline`: fetch, checksum, encrypt, persist, on a bounded worker pool
//! - `AssetReceipt`: where an asset was stored and what it contained
//! - `ArchivedRecord`: a record together with the receipts of its assets
//! - `Cipher` / `FernetCipher`: the optional encryption step, and `decrypt_dir` to undo it
//!
//! Each asset is stored under a key derived only from its URL. Within one
//! pipeline an asset is fetched and stored at most once; records that link
//! an already archived image reuse its receipt. A failed asset may be retried
//! by a later record. The checksum is always taken over the downloaded
//! bytes, before encryption.

mod cipher;
mod config;
mod error;

pub use cipher::{Cipher, DecryptSummary, FernetCipher, decrypt_dir, decrypted_file_name};
pub use config::{
    DEFAULT_ASSET_CONCURRENCY, DEFAULT_MAX_PENDING_RECORDS, PipelineConfig, PipelineConfigBuilder,
};
pub use error::{AssetError, CipherError};

use async_stream::stream;
use futures::{Stream, StreamExt, future};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::crawler::{Fetcher, Record};
use crate::error::Result;
use crate::storage::{BackendRegistry, StorageBackend, StorageConfig};

/// Result of archiving one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReceipt {
    /// The asset URL as found in the record
    pub url: String,

    /// Key of the stored object, including the store prefix
    pub storage_key: String,

    /// Hex MD5 of the downloaded bytes
    pub checksum: String,

    /// Size of the stored object, after encryption if enabled
    pub byte_size: u64,
}

/// A record with the receipts of the assets that were archived for it
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedRecord {
    #[serde(flatten)]
    pub record: Record,

    /// One receipt per successfully archived asset
    pub files: Vec<AssetReceipt>,
}

/// Storage path for an asset: `full/<sha256 of the url><extension>`
pub fn file_path(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let extension = Url::parse(url).ok().and_then(|parsed| {
        Path::new(parsed.path())
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
    });
    match extension {
        Some(ext) => format!("full/{}.{}", digest, ext),
        None => format!("full/{}", digest),
    }
}

/// Archives record assets into a storage backend
#[derive(Clone)]
pub struct AssetPipeline {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn StorageBackend>,
    cipher: Option<Arc<dyn Cipher>>,
    permits: Arc<Semaphore>,
    max_pending_records: usize,
    archived: Arc<Mutex<HashMap<String, Arc<OnceCell<AssetReceipt>>>>>,
}

impl std::fmt::Debug for AssetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetPipeline")
            .field("encrypted", &self.cipher.is_some())
            .field("available_permits", &self.permits.available_permits())
            .field("max_pending_records", &self.max_pending_records)
            .finish()
    }
}

impl AssetPipeline {
    /// Create a pipeline over an already opened store, without encryption
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn StorageBackend>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            cipher: None,
            permits: Arc::new(Semaphore::new(config.asset_concurrency.max(1))),
            max_pending_records: config.max_pending_records.max(1),
            archived: Arc::default(),
        }
    }

    /// Encrypt every asset with `cipher` before it is stored
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Resolve the files store and cipher from `config`.
    ///
    /// Fails with [`crate::Error::StorageInit`] if the store cannot be opened
    /// and with [`crate::Error::Config`] if the encryption key is invalid.
    /// Nothing has been crawled yet when either happens.
    #[instrument(skip_all, fields(files_store = %config.files_store))]
    pub async fn open(
        config: &PipelineConfig,
        storage: &StorageConfig,
        registry: &BackendRegistry,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let cipher = config
            .encryption_key
            .as_deref()
            .map(FernetCipher::new)
            .transpose()?;
        let store = registry.open(&config.files_store, storage).await?;

        let pipeline = Self::new(fetcher, store, config);
        Ok(match cipher {
            Some(cipher) => {
                info!("Archived files will be encrypted");
                pipeline.with_cipher(Arc::new(cipher))
            }
            None => pipeline,
        })
    }

    /// Fetch one asset and store it.
    ///
    /// Does not take a worker permit; callers bound concurrency.
    #[instrument(skip(self))]
    pub async fn acquire(&self, url: &str) -> std::result::Result<AssetReceipt, AssetError> {
        let bytes = self.fetcher.fetch(url).await?;
        let checksum = format!("{:x}", md5::compute(&bytes));

        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&bytes)?,
            None => bytes,
        };
        let stored = self.store.persist(&file_path(url), payload).await?;

        info!(
            monotonic_counter.assets_persisted = 1_u64,
            key = %stored.key,
            bytes = stored.byte_size,
            "Persisted asset"
        );
        Ok(AssetReceipt {
            url: url.to_string(),
            storage_key: stored.key,
            checksum,
            byte_size: stored.byte_size,
        })
    }

    /// Like [`acquire`](Self::acquire), but each storage path is archived
    /// at most once per pipeline.
    ///
    /// Concurrent callers for the same asset wait for the first one and get
    /// its receipt. Failures are not remembered.
    pub async fn acquire_once(&self, url: &str) -> std::result::Result<AssetReceipt, AssetError> {
        let cell = {
            let mut archived = self.archived.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(archived.entry(file_path(url)).or_default())
        };
        if let Some(receipt) = cell.get() {
            debug!(asset = %url, "Asset already archived");
            return Ok(receipt.clone());
        }
        cell.get_or_try_init(|| self.acquire(url)).await.cloned()
    }

    /// Archive every asset of `record`.
    ///
    /// Assets run on the shared worker pool. A failed asset is logged and
    /// left out of `files`; the record itself is always returned. Receipts
    /// keep the order of the record's asset URLs.
    #[instrument(skip_all, fields(url = %record.source_url(), assets = record.asset_urls().len()))]
    pub async fn archive_record(&self, record: Record) -> ArchivedRecord {
        let mut tasks = Vec::with_capacity(record.asset_urls().len());
        for url in record.asset_urls() {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let pipeline = self.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let result = pipeline.acquire_once(&url).await;
                (url, result)
            }));
        }

        let mut files = Vec::with_capacity(tasks.len());
        for joined in future::join_all(tasks).await {
            match joined {
                Ok((_, Ok(receipt))) => files.push(receipt),
                Ok((url, Err(e))) => warn!(asset = %url, "Skipping asset: {}", e),
                Err(e) => error!("Asset task failed: {}", e),
            }
        }

        ArchivedRecord { record, files }
    }

    /// Archive the assets of every record in `records`.
    ///
    /// At most `max_pending_records` records are worked on at once; the
    /// input stream is not polled while that many are pending. Output order
    /// is completion order.
    pub fn archive<S>(&self, records: S) -> impl Stream<Item = ArchivedRecord> + Send + 'static
    where
        S: Stream<Item = Record> + Send + 'static,
    {
        let pipeline = self.clone();
        let max_pending = self.max_pending_records;

        stream! {
            let mut records = Box::pin(records);
            let mut pending: JoinSet<ArchivedRecord> = JoinSet::new();
            let mut accepting = true;

            loop {
                let done = tokio::select! {
                    biased;
                    Some(done) = pending.join_next() => done,
                    record = records.next(), if accepting && pending.len() < max_pending => {
                        match record {
                            Some(record) => {
                                debug!(url = %record.source_url(), "Dispatching record");
                                let pipeline = pipeline.clone();
                                pending.spawn(async move { pipeline.archive_record(record).await });
                            }
                            None => accepting = false,
                        }
                        continue;
                    }
                    else => break,
                };
                if let Some(archived) = completed(done) {
                    yield archived;
                }
            }
        }
    }
}

fn completed(done: std::result::Result<ArchivedRecord, JoinError>) -> Option<ArchivedRecord> {
    match done {
        Ok(archived) => {
            info!(
                monotonic_counter.records_archived = 1_u64,
                url = %archived.record.source_url(),
                files = archived.files.len(),
                "Archived record"
            );
            Some(archived)
        }
        Err(e) => {
            error!("Record task failed: {}", e);
            None
        }
    }
}
