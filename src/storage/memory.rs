//! In-memory backend, used by tests and dry runs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{ObjectMeta, PersistReceipt, StorageBackend, StorageError, object_key};

/// Keeps objects in a shared map. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    prefix: Option<String>,
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store objects below `prefix`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Make every following persist fail with [`StorageError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Bytes stored under the full `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of persist calls, including failed ones
    pub fn persist_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn persist(&self, path: &str, bytes: Vec<u8>) -> Result<PersistReceipt, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store set to fail".to_string()));
        }

        let key = object_key(self.prefix.as_deref(), path);
        let byte_size = bytes.len() as u64;
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes);
        Ok(PersistReceipt { key, byte_size })
    }

    async fn stat(&self, path: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let key = object_key(self.prefix.as_deref(), path);
        let size = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|bytes| bytes.len() as u64);
        Ok(size.map(|byte_size| ObjectMeta { key, byte_size }))
    }
}
