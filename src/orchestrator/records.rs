//! Persisted batch and task records.
//!
//! | Record | Datastore key | Holder data |
//! |--------|---------------|-------------|
//! | [`BatchRecord`] | `batch:<batch_id>` | [`BatchData`] |
//! | [`TaskRecord`] | `task:<batch_id>:<index>` | [`UnitResult`](crate::models::UnitResult) |
//!
//! Task keys depend only on the batch id and the unit index, so any worker
//! can address a unit's record without coordination.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ErrorEntry;
use crate::store::JsonHolder;

/// Datastore key of a batch record.
pub fn batch_record_key(batch_id: &str) -> String {
    format!("batch:{}", batch_id)
}

/// Task key of unit `index` of a batch: `<batch_id>:<index>`.
pub fn task_key(batch_id: &str, index: usize) -> String {
    format!("{}:{}", batch_id, index)
}

/// Datastore key of a task record.
pub fn task_record_key(task_key: &str) -> String {
    format!("task:{}", task_key)
}

/// One request to run the tests under `fullname`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub fullname: String,
    /// `None` until discovery has finished.
    pub num_units: Option<usize>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: JsonHolder,
}

impl BatchRecord {
    pub fn pending(fullname: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
            num_units: None,
            created_at: Utc::now(),
            data: JsonHolder::new(),
        }
    }
}

/// Discovery output stored in a batch's holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchData {
    pub test_unit_methods: BTreeMap<String, Vec<String>>,
    pub load_errors: Vec<ErrorEntry>,
}

/// One unit of a batch; its holder is empty until the unit has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub fullname: String,
    #[serde(default)]
    pub data: JsonHolder,
}

impl TaskRecord {
    pub fn new(fullname: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
            data: JsonHolder::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.data.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let key = task_key("0f3a", 7);
        assert_eq!(key, "0f3a:7");
        assert_eq!(task_record_key(&key), "task:0f3a:7");
        assert_eq!(batch_record_key("0f3a"), "batch:0f3a");
        assert_eq!(task_key("0f3a", 7), key);
    }

    #[test]
    fn test_pending_batch_has_unknown_units() {
        let batch = BatchRecord::pending("pkg");
        assert_eq!(batch.num_units, None);
        assert!(!batch.data.is_set());

        let json = serde_json::to_string(&batch).unwrap();
        let parsed: BatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.num_units, None);
        assert_eq!(parsed.fullname, "pkg");
    }

    #[test]
    fn test_new_task_is_unfinished() {
        assert!(!TaskRecord::new("pkg.test_a").is_finished());
    }
}
