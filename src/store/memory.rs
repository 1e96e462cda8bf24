use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BlobStore, Datastore, StoreResult};

/// Records and blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    /// Keys of every stored record, sorted.
    pub fn record_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.records).keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        lock(&self.records).insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        lock(&self.records).remove(key);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn write(&self, data: Vec<u8>) -> StoreResult<String> {
        let key = uuid::Uuid::new_v4().to_string();
        lock(&self.blobs).insert(key.clone(), data);
        Ok(key)
    }

    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(lock(&self.blobs).get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        lock(&self.blobs).remove(key);
        Ok(())
    }
}
