//! JSON payloads that may spill into the blob store.
//!
//! A [`JsonHolder`] is embedded in a record under the `data` field. Small
//! payloads are kept inline; payloads over
//! `storage.max_inline_json_bytes` are written to a blob first, then the
//! blob key is recorded in the holder, then a
//! [`DeferredCall::DeleteBlobIfDone`] is scheduled. That call deletes the
//! blob once the owning record is gone or refers to another blob, and
//! otherwise checks again later.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Storage, StoreError, StoreResult};
use crate::queue::{DeferredCall, QueuedCall, defer};

/// Inline JSON or a reference to a blob holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonHolder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob_key: Option<String>,
}

impl JsonHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once data has been stored.
    pub fn is_set(&self) -> bool {
        self.json.is_some() || self.blob_key.is_some()
    }

    pub fn blob_key(&self) -> Option<&str> {
        self.blob_key.as_deref()
    }

    /// Stores `data`, spilling to a blob when it is too large.
    ///
    /// `holder_key` is the key of the record this holder is saved in. The
    /// caller must write that record afterwards for the data to persist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingKey`] if `holder_key` is empty, or any
    /// serialization, blob or queue error.
    pub async fn set_json<T: Serialize + Sync>(
        &mut self,
        holder_key: &str,
        data: &T,
        storage: &Storage,
    ) -> StoreResult<()> {
        if holder_key.is_empty() {
            return Err(StoreError::MissingKey);
        }

        let json = serde_json::to_string(data)?;
        let settings = storage.settings();

        if json.len() <= settings.max_inline_json_bytes {
            self.json = Some(json);
            self.blob_key = None;
            return Ok(());
        }

        let size = json.len();
        let blob_key = storage.blobs().write(json.into_bytes()).await?;
        debug!(
            "Stored {} bytes for {} in blob {}",
            size, holder_key, blob_key
        );
        self.json = None;
        self.blob_key = Some(blob_key.clone());

        defer(
            storage.queue(),
            &settings.test_queue,
            QueuedCall::after(
                DeferredCall::DeleteBlobIfDone {
                    holder_key: holder_key.to_string(),
                    blob_key,
                },
                settings.blob_cleanup_delay(),
            ),
        )
        .await?;
        Ok(())
    }

    /// Loads the stored data, or `None` if nothing was stored.
    ///
    /// A blob that has already been collected reads as `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, storage: &Storage) -> StoreResult<Option<T>> {
        if let Some(json) = &self.json {
            return Ok(Some(serde_json::from_str(json)?));
        }
        let Some(blob_key) = &self.blob_key else {
            return Ok(None);
        };
        match storage.blobs().read(blob_key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => {
                warn!("Blob {} referenced by a holder is missing", blob_key);
                Ok(None)
            }
        }
    }
}

#[derive(Deserialize)]
struct HolderView {
    #[serde(default)]
    data: JsonHolder,
}

/// True if the record at `holder_key` exists and its holder points at
/// `blob_key`.
pub async fn holder_refers_to(
    storage: &Storage,
    holder_key: &str,
    blob_key: &str,
) -> StoreResult<bool> {
    let view: Option<HolderView> = storage.get_record(holder_key).await?;
    Ok(view.is_some_and(|view| view.data.blob_key() == Some(blob_key)))
}
