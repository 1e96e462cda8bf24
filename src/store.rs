//! Durable result storage.
//!
//! Batch and task records live in a [`Datastore`]: a key-value store that
//! guarantees atomic single-record reads and writes and nothing more. Large
//! payloads go to a [`BlobStore`] instead, referenced from the record by a
//! [`JsonHolder`].
//!
//! | Backend | Datastore | Blobs |
//! |---------|-----------|-------|
//! | `memory` | [`MemoryStore`] | [`MemoryStore`] |
//! | `fs` | [`FsStore`], one JSON file per record | [`FsStore`], one file per blob |
//!
//! [`Storage`] bundles the two stores with the work queue, because storing
//! a large payload schedules the blob's garbage collection.

mod fs;
mod holder;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::StorageConfig;
use crate::queue::{QueueError, TaskQueue};

pub use fs::FsStore;
pub use holder::{JsonHolder, holder_refers_to};
pub use memory::MemoryStore;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by stores and holders.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A holder was written before its owning record had a key.
    #[error("cannot store data in a holder without a key")]
    MissingKey,

    /// Scheduling blob cleanup failed.
    #[error("failed to schedule blob cleanup: {0}")]
    Queue(#[from] QueueError),
}

/// Key-value record store.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn put(&self, key: &str, value: String) -> StoreResult<()>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn delete_many(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Store for payloads too large to keep inline.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes a new blob and returns its key.
    async fn write(&self, data: Vec<u8>) -> StoreResult<String>;

    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Deletes a blob. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// The stores and queue shared by the orchestrator and holders.
#[derive(Clone)]
pub struct Storage {
    datastore: Arc<dyn Datastore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn TaskQueue>,
    settings: StorageConfig,
}

impl Storage {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn TaskQueue>,
        settings: StorageConfig,
    ) -> Self {
        Self {
            datastore,
            blobs,
            queue,
            settings,
        }
    }

    /// Builds the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the file-backed store's directories cannot be
    /// created.
    pub fn from_config(settings: &StorageConfig, queue: Arc<dyn TaskQueue>) -> StoreResult<Self> {
        match settings.backend.fs_path() {
            None => {
                let store = Arc::new(MemoryStore::new());
                Ok(Self::new(store.clone(), store, queue, settings.clone()))
            }
            Some(root) => {
                let store = Arc::new(FsStore::open(root)?);
                Ok(Self::new(store.clone(), store, queue, settings.clone()))
            }
        }
    }

    pub fn datastore(&self) -> &dyn Datastore {
        self.datastore.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    pub fn settings(&self) -> &StorageConfig {
        &self.settings
    }

    /// Reads and deserializes a record.
    pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.datastore.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serializes and writes a record.
    pub async fn put_record<T: Serialize + Sync>(&self, key: &str, record: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(record)?;
        self.datastore.put(key, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::queue::MemoryQueue;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: usize,
    }

    #[tokio::test]
    async fn test_record_round_trip_memory() {
        let storage = Storage::from_config(&StorageConfig::default(), Arc::new(MemoryQueue::new()))
            .unwrap();
        let record = Record {
            name: "a".to_string(),
            count: 2,
        };
        storage.put_record("k", &record).await.unwrap();
        assert_eq!(storage.get_record::<Record>("k").await.unwrap(), Some(record));
        assert_eq!(storage.get_record::<Record>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_from_config_fs_backend() {
        let dir = TempDir::new().unwrap();
        let settings = StorageConfig {
            backend: StoreBackend::Fs {
                path: dir.path().join("store").to_string_lossy().to_string(),
            },
            ..Default::default()
        };
        let storage = Storage::from_config(&settings, Arc::new(MemoryQueue::new())).unwrap();
        storage
            .datastore()
            .put("batch:1", "{}".to_string())
            .await
            .unwrap();
        assert!(dir.path().join("store").join("records").is_dir());
        storage
            .datastore()
            .delete_many(&["batch:1".to_string(), "batch:2".to_string()])
            .await
            .unwrap();
        assert!(storage.datastore().get("batch:1").await.unwrap().is_none());
    }
}
