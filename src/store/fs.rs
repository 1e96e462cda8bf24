//! File-backed store.
//!
//! ```text
//! <root>/
//! ├── records/<sha256(key)>.json
//! └── blobs/<uuid>
//! ```
//!
//! Record file names are hashes so that any key is a valid file name.
//! Writes go to a temporary file first and are renamed into place, which
//! keeps single-record writes atomic.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{BlobStore, Datastore, StoreResult};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens a store under `root`, creating its directories.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("blobs"))?;
        tracing::debug!("Opened file store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.root
            .join("records")
            .join(format!("{:x}.json", hasher.finalize()))
    }

    fn blob_path(&self, key: &str) -> Option<PathBuf> {
        // Blob keys are generated here; anything else cannot name a blob.
        uuid::Uuid::parse_str(key)
            .ok()
            .map(|id| self.root.join("blobs").join(id.to_string()))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_optional(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl Datastore for FsStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match read_optional(&self.record_path(key)).await? {
            Some(data) => Ok(Some(
                String::from_utf8(data)
                    .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?,
            )),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        write_atomic(&self.record_path(key), value.as_bytes()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        remove_optional(&self.record_path(key)).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsStore {
    async fn write(&self, data: Vec<u8>) -> StoreResult<String> {
        let key = uuid::Uuid::new_v4().to_string();
        let path = self.root.join("blobs").join(&key);
        write_atomic(&path, &data).await?;
        tracing::debug!("Wrote blob {} ({} bytes)", key, data.len());
        Ok(key)
    }

    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.blob_path(key) {
            Some(path) => Ok(read_optional(&path).await?),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if let Some(path) = self.blob_path(key) {
            remove_optional(&path).await?;
        }
        Ok(())
    }
}
