//! Local directory backend

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

use super::{ObjectMeta, PersistReceipt, StorageBackend, StorageError};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores objects as files below a root directory.
///
/// Objects are written to a temporary sibling file and renamed into place.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Use `root` as the store, creating it if needed
    pub async fn create(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Init(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageBackend for FsStore {
    async fn persist(&self, path: &str, bytes: Vec<u8>) -> Result<PersistReceipt, StorageError> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(path.to_string()))?;
        fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::InvalidKey(path.to_string()))?;
        let temp = parent.join(format!(
            ".{}.{}-{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let byte_size = bytes.len() as u64;
        if let Err(e) = fs::write(&temp, &bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("Wrote {} ({} bytes)", target.display(), byte_size);
        Ok(PersistReceipt {
            key: path.trim_start_matches('/').to_string(),
            byte_size,
        })
    }

    async fn stat(&self, path: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let target = self.resolve(path)?;
        match fs::metadata(&target).await {
            Ok(metadata) => Ok(Some(ObjectMeta {
                key: path.trim_start_matches('/').to_string(),
                byte_size: metadata.len(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::create(dir.path().join("archive")).await.unwrap();

        let receipt = store
            .persist("posts/123-1-4.jl.gz", b"payload".to_vec())
            .await
            .unwrap();
        assert_eq!(receipt.key, "posts/123-1-4.jl.gz");
        assert_eq!(receipt.byte_size, 7);

        let meta = store.stat("posts/123-1-4.jl.gz").await.unwrap().unwrap();
        assert_eq!(meta.byte_size, 7);
        assert_eq!(store.stat("posts/none.jl.gz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::create(dir.path()).await.unwrap();

        store.persist("full/a.jpg", b"one".to_vec()).await.unwrap();
        store.persist("full/a.jpg", b"second".to_vec()).await.unwrap();

        let content = std::fs::read(dir.path().join("full/a.jpg")).unwrap();
        assert_eq!(content, b"second");
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("full"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::create(dir.path()).await.unwrap();

        assert!(matches!(
            store.persist("../outside", b"x".to_vec()).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.persist("", b"x".to_vec()).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
