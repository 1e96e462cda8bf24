//! Batch orchestration.
//!
//! A batch is one request to run every test under a fullname. In deferred
//! mode it moves through these states, each step being a [`DeferredCall`]
//! executed by a worker:
//!
//! ```text
//!   start_batch ──► PENDING (num_units unknown)
//!                      │ InitializeBatch
//!                      ▼
//!                   DISCOVERING ──► task records, one per unit
//!                      │
//!                      ├──► RunTestUnit × N ──► result stored in each task record
//!                      └──► DeleteBatch(num_done = 0) after the cleanup delay
//!                              │
//!                              ├── every unit finished ─────────► delete batch and tasks
//!                              ├── more units finished than
//!                              │   num_done ─────────────────────► DeleteBatch(finished) later
//!                              └── no progress since last check ─► delete batch and tasks
//! ```
//!
//! Every call is idempotent: task keys are derived from the batch id and the
//! unit index, a re-run unit overwrites its own result, and cleanup of a
//! batch that is already gone does nothing.
//!
//! In immediate mode [`Orchestrator::start_batch`] discovers and runs
//! everything inside the call and returns the results directly, without
//! touching the store or the queue.
//!
//! Discovery and test execution are blocking; they run on tokio's blocking
//! thread pool.

pub mod records;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::config::StorageMode;
use crate::discovery::{Discovery, TestObject};
use crate::executor::LocalExecutor;
use crate::models::{BatchInfo, MethodsInfo, ObjectTypeInfo, StartBatchResponse, UnitResult};
use crate::queue::{CallExecutor, DeferredCall, QueueError, QueuedCall, defer, defer_multi};
use crate::store::{Storage, StoreError, holder_refers_to};

pub use records::{
    BatchData, BatchRecord, TaskRecord, batch_record_key, task_key, task_record_key,
};

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors raised by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to schedule work: {0}")]
    Queue(#[from] QueueError),

    /// No batch with this id exists.
    #[error("no batch with id '{0}'")]
    UnknownBatch(String),

    /// `batch_results` was asked to start past the end of the batch.
    #[error("start {start} is past the end of the batch ({num_units} units)")]
    StartOutOfRange { start: usize, num_units: usize },

    /// A blocking discovery or execution task died.
    #[error("execution failed: {0}")]
    Execution(String),
}

/// Runs batches over a [`Discovery`] and a [`Storage`].
#[derive(Clone)]
pub struct Orchestrator {
    discovery: Discovery,
    storage: Storage,
    executor: LocalExecutor,
}

struct Discovered {
    units: Vec<TestObject>,
    data: BatchData,
}

impl Orchestrator {
    pub fn new(discovery: Discovery, storage: Storage) -> Self {
        Self {
            discovery,
            storage,
            executor: LocalExecutor::new(),
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Runs `f` with the discovery on the blocking pool.
    async fn blocking<F, R>(&self, f: F) -> OrchestratorResult<R>
    where
        F: FnOnce(&Discovery, LocalExecutor) -> R + Send + 'static,
        R: Send + 'static,
    {
        let discovery = self.discovery.clone();
        let executor = self.executor;
        tokio::task::spawn_blocking(move || f(&discovery, executor))
            .await
            .map_err(|e| OrchestratorError::Execution(e.to_string()))
    }

    /// Resolves `fullname`; bad names resolve to bad tests.
    pub async fn resolve(&self, fullname: &str) -> OrchestratorResult<TestObject> {
        let fullname = fullname.to_string();
        self.blocking(move |discovery, _| discovery.resolve(&fullname))
            .await
    }

    /// Lists every test method under `fullname`.
    pub async fn get_methods(&self, fullname: &str) -> OrchestratorResult<MethodsInfo> {
        let fullname = fullname.to_string();
        self.blocking(move |discovery, _| {
            let obj = discovery.resolve(&fullname);
            let mut load_errors = Vec::new();
            let method_names = discovery
                .get_methods(&obj, &mut load_errors)
                .iter()
                .map(|method| method.fullname().to_string())
                .collect();
            MethodsInfo {
                method_names,
                load_errors,
            }
        })
        .await
    }

    pub async fn object_type(&self, fullname: &str) -> OrchestratorResult<ObjectTypeInfo> {
        let obj = self.resolve(fullname).await?;
        Ok(ObjectTypeInfo {
            object_type: obj.type_name().to_string(),
        })
    }

    /// Starts a batch for `fullname`.
    ///
    /// A name that does not resolve still starts a batch; the failure shows
    /// up in the batch's load errors.
    pub async fn start_batch(&self, fullname: &str) -> OrchestratorResult<StartBatchResponse> {
        match self.storage.settings().mode {
            StorageMode::Immediate => {
                let (batch_info, results) = self.run_immediate(fullname).await?;
                Ok(StartBatchResponse::Immediate {
                    batch_info,
                    results,
                })
            }
            StorageMode::Deferred => {
                let batch_id = uuid::Uuid::new_v4().to_string();
                self.storage
                    .put_record(&batch_record_key(&batch_id), &BatchRecord::pending(fullname))
                    .await?;
                defer(
                    self.storage.queue(),
                    &self.storage.settings().test_queue,
                    QueuedCall::now(DeferredCall::InitializeBatch {
                        fullname: fullname.to_string(),
                        batch_key: batch_id.clone(),
                    }),
                )
                .await?;
                info!("Started batch {} for '{}'", batch_id, fullname);
                Ok(StartBatchResponse::Deferred { batch_id })
            }
        }
    }

    async fn discover(&self, fullname: &str) -> OrchestratorResult<Discovered> {
        let fullname = fullname.to_string();
        self.blocking(move |discovery, _| {
            let obj = discovery.resolve(&fullname);
            let mut load_errors = Vec::new();
            let units = discovery.get_units(&obj, &mut load_errors);
            let mut test_unit_methods = BTreeMap::new();
            for unit in &units {
                let methods = discovery
                    .get_methods(unit, &mut load_errors)
                    .iter()
                    .map(|method| method.fullname().to_string())
                    .collect();
                test_unit_methods.insert(unit.fullname().to_string(), methods);
            }
            load_errors.dedup();
            Discovered {
                units,
                data: BatchData {
                    test_unit_methods,
                    load_errors,
                },
            }
        })
        .await
    }

    /// Discovers and runs everything under `fullname` inside the call.
    pub async fn run_immediate(
        &self,
        fullname: &str,
    ) -> OrchestratorResult<(BatchInfo, Vec<UnitResult>)> {
        let discovered = self.discover(fullname).await?;
        let num_units = discovered.units.len();
        let mut results = Vec::with_capacity(num_units);
        for unit in discovered.units {
            let name = unit.fullname().to_string();
            results.push(
                self.blocking(move |discovery, executor| executor.run_unit(discovery, &name))
                    .await?,
            );
        }
        debug!("Ran {} units for '{}' immediately", num_units, fullname);
        Ok((
            BatchInfo {
                num_units: Some(num_units),
                test_unit_methods: discovered.data.test_unit_methods,
                load_errors: discovered.data.load_errors,
            },
            results,
        ))
    }

    /// Discovers the units of a pending batch and schedules their runs.
    pub async fn initialize_batch(&self, fullname: &str, batch_id: &str) -> OrchestratorResult<()> {
        let batch_key = batch_record_key(batch_id);
        let Some(mut batch) = self.storage.get_record::<BatchRecord>(&batch_key).await? else {
            warn!("Batch {} disappeared before initialization", batch_id);
            return Ok(());
        };
        if batch.num_units.is_some() {
            debug!("Batch {} is already initialized", batch_id);
            return Ok(());
        }

        let discovered = self.discover(fullname).await?;
        let num_units = discovered.units.len();
        let settings = self.storage.settings();

        let mut calls = Vec::with_capacity(num_units + 1);
        for (index, unit) in discovered.units.iter().enumerate() {
            let key = task_key(batch_id, index);
            let record_key = task_record_key(&key);
            // A retried initialization must not wipe finished results.
            if self.storage.datastore().get(&record_key).await?.is_none() {
                self.storage
                    .put_record(&record_key, &TaskRecord::new(unit.fullname()))
                    .await?;
            }
            calls.push(QueuedCall::now(DeferredCall::RunTestUnit {
                fullname: unit.fullname().to_string(),
                task_key: key,
            }));
        }
        calls.push(QueuedCall::after(
            DeferredCall::DeleteBatch {
                batch_key: batch_id.to_string(),
                num_done: 0,
            },
            settings.batch_cleanup_delay(),
        ));
        defer_multi(self.storage.queue(), &settings.test_queue, calls).await?;

        batch.num_units = Some(num_units);
        batch
            .data
            .set_json(&batch_key, &discovered.data, &self.storage)
            .await?;
        self.storage.put_record(&batch_key, &batch).await?;

        info!(
            "Initialized batch {}: {} units, {} load errors",
            batch_id,
            num_units,
            discovered.data.load_errors.len()
        );
        Ok(())
    }

    /// Runs one unit and stores its result in the task record.
    pub async fn run_unit(&self, fullname: &str, task_key: &str) -> OrchestratorResult<()> {
        let record_key = task_record_key(task_key);
        let Some(mut task) = self.storage.get_record::<TaskRecord>(&record_key).await? else {
            debug!("Task {} is gone; its batch was deleted", task_key);
            return Ok(());
        };

        let name = fullname.to_string();
        let result = self
            .blocking(move |discovery, executor| executor.run_unit(discovery, &name))
            .await?;

        task.data.set_json(&record_key, &result, &self.storage).await?;
        self.storage.put_record(&record_key, &task).await?;
        debug!(
            "Stored result of {} ({} errors, {} failures)",
            fullname,
            result.errors.len(),
            result.failures.len()
        );
        Ok(())
    }

    /// Deletes a batch once its units have finished or stopped progressing.
    pub async fn delete_batch(&self, batch_id: &str, num_done: usize) -> OrchestratorResult<()> {
        let Some(batch) = self.load_batch(batch_id).await? else {
            debug!("Batch {} already deleted", batch_id);
            return Ok(());
        };

        let Some(tasks) = self.batch_tasks(batch_id, &batch).await? else {
            debug!("Batch {} is still being discovered", batch_id);
            return self.reschedule_delete(batch_id, num_done).await;
        };

        let finished = tasks
            .iter()
            .filter(|task| task.as_ref().is_some_and(TaskRecord::is_finished))
            .count();

        if finished < tasks.len() && finished > num_done {
            debug!(
                "Batch {}: {}/{} units finished, checking again later",
                batch_id,
                finished,
                tasks.len()
            );
            return self.reschedule_delete(batch_id, finished).await;
        }

        if finished < tasks.len() {
            warn!(
                "Batch {} made no progress ({}/{} units finished); deleting it",
                batch_id,
                finished,
                tasks.len()
            );
        }

        let mut keys: Vec<String> = (0..tasks.len())
            .map(|index| task_record_key(&task_key(batch_id, index)))
            .collect();
        keys.push(batch_record_key(batch_id));
        self.storage.datastore().delete_many(&keys).await?;
        info!("Deleted batch {} and its {} tasks", batch_id, tasks.len());
        Ok(())
    }

    async fn reschedule_delete(&self, batch_id: &str, num_done: usize) -> OrchestratorResult<()> {
        let settings = self.storage.settings();
        defer(
            self.storage.queue(),
            &settings.test_queue,
            QueuedCall::after(
                DeferredCall::DeleteBatch {
                    batch_key: batch_id.to_string(),
                    num_done,
                },
                settings.batch_cleanup_delay(),
            ),
        )
        .await?;
        Ok(())
    }

    /// Deletes a blob unless its holder still refers to it.
    pub async fn delete_blob_if_done(
        &self,
        holder_key: &str,
        blob_key: &str,
    ) -> OrchestratorResult<()> {
        if holder_refers_to(&self.storage, holder_key, blob_key).await? {
            let settings = self.storage.settings();
            defer(
                self.storage.queue(),
                &settings.test_queue,
                QueuedCall::after(
                    DeferredCall::DeleteBlobIfDone {
                        holder_key: holder_key.to_string(),
                        blob_key: blob_key.to_string(),
                    },
                    settings.blob_cleanup_delay(),
                ),
            )
            .await?;
            return Ok(());
        }

        self.storage.blobs().delete(blob_key).await?;
        debug!("Deleted blob {} of {}", blob_key, holder_key);
        Ok(())
    }

    async fn load_batch(&self, batch_id: &str) -> OrchestratorResult<Option<BatchRecord>> {
        Ok(self
            .storage
            .get_record::<BatchRecord>(&batch_record_key(batch_id))
            .await?)
    }

    /// Task records of a batch by index, or `None` while the unit count is
    /// unknown. Missing records are `None` entries.
    pub async fn batch_tasks(
        &self,
        batch_id: &str,
        batch: &BatchRecord,
    ) -> OrchestratorResult<Option<Vec<Option<TaskRecord>>>> {
        let Some(num_units) = batch.num_units else {
            return Ok(None);
        };
        let tasks = try_join_all((0..num_units).map(|index| {
            let key = task_record_key(&task_key(batch_id, index));
            async move { self.storage.get_record::<TaskRecord>(&key).await }
        }))
        .await?;
        Ok(Some(tasks))
    }

    /// Metadata of a batch.
    pub async fn batch_info(&self, batch_id: &str) -> OrchestratorResult<BatchInfo> {
        let batch = self
            .load_batch(batch_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownBatch(batch_id.to_string()))?;
        let data: BatchData = batch
            .data
            .get_json(&self.storage)
            .await?
            .unwrap_or_default();
        Ok(BatchInfo {
            num_units: batch.num_units,
            test_unit_methods: data.test_unit_methods,
            load_errors: data.load_errors,
        })
    }

    /// Results from unit `start` up to the first unfinished unit.
    ///
    /// While the unit count is unknown the batch counts as empty.
    pub async fn batch_results(
        &self,
        batch_id: &str,
        start: usize,
    ) -> OrchestratorResult<Vec<UnitResult>> {
        let batch = self
            .load_batch(batch_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownBatch(batch_id.to_string()))?;
        let num_units = batch.num_units.unwrap_or(0);
        if start > num_units {
            return Err(OrchestratorError::StartOutOfRange { start, num_units });
        }

        let mut results = Vec::new();
        for index in start..num_units {
            let key = task_record_key(&task_key(batch_id, index));
            let Some(task) = self.storage.get_record::<TaskRecord>(&key).await? else {
                break;
            };
            match task.data.get_json::<UnitResult>(&self.storage).await? {
                Some(result) => results.push(result),
                None => break,
            }
        }
        Ok(results)
    }

    /// Dispatches a deferred call.
    pub async fn execute(&self, call: DeferredCall) -> OrchestratorResult<()> {
        match call {
            DeferredCall::InitializeBatch {
                fullname,
                batch_key,
            } => self.initialize_batch(&fullname, &batch_key).await,
            DeferredCall::RunTestUnit { fullname, task_key } => {
                self.run_unit(&fullname, &task_key).await
            }
            DeferredCall::DeleteBatch {
                batch_key,
                num_done,
            } => self.delete_batch(&batch_key, num_done).await,
            DeferredCall::DeleteBlobIfDone {
                holder_key,
                blob_key,
            } => self.delete_blob_if_done(&holder_key, &blob_key).await,
        }
    }
}

#[async_trait]
impl CallExecutor for Orchestrator {
    async fn execute(&self, call: DeferredCall) -> anyhow::Result<()> {
        Ok(Orchestrator::execute(self, call).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use crate::queue::{MemoryQueue, TaskQueue};
    use crate::sample::{SAMPLE_PACKAGE, sample_catalog};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const ONE_TESTCASE: &str = "sample_package.test_one_testcase";

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
    }

    fn harness(mode: StorageMode, max_inline_json_bytes: usize) -> Harness {
        let mut config = Config::default();
        config.tests.package_names = vec![SAMPLE_PACKAGE.to_string()];
        let discovery = Discovery::from_config(Arc::new(sample_catalog()), &config).unwrap();
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let settings = StorageConfig {
            mode,
            max_inline_json_bytes,
            ..Default::default()
        };
        let storage = Storage::new(store.clone(), store.clone(), queue.clone(), settings);
        Harness {
            orchestrator: Orchestrator::new(discovery, storage),
            store,
            queue,
        }
    }

    impl Harness {
        /// Runs every queued call whose name is in `names`, ignoring countdowns.
        async fn drain(&self, names: &[&str]) -> usize {
            let mut ran = 0;
            loop {
                let (ready, rest): (Vec<_>, Vec<_>) = self
                    .queue
                    .take_all()
                    .into_iter()
                    .partition(|task| names.contains(&task.call.name()));
                for task in rest {
                    self.queue
                        .add(&task.queue_name, vec![QueuedCall::now(task.call)])
                        .await
                        .unwrap();
                }
                if ready.is_empty() {
                    return ran;
                }
                for task in ready {
                    self.orchestrator.execute(task.call).await.unwrap();
                    ran += 1;
                }
            }
        }

        async fn start(&self, fullname: &str) -> String {
            match self.orchestrator.start_batch(fullname).await.unwrap() {
                StartBatchResponse::Deferred { batch_id } => batch_id,
                other => panic!("expected a deferred batch, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_immediate_mode_returns_results_and_queues_nothing() {
        let h = harness(StorageMode::Immediate, 1_000_000);
        let method = "sample_package.test_one_testcase.SimpleTestCase.test_pass";
        let response = h.orchestrator.start_batch(method).await.unwrap();

        let StartBatchResponse::Immediate {
            batch_info,
            results,
        } = response
        else {
            panic!("expected immediate results");
        };
        assert_eq!(batch_info.num_units, Some(1));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fullname, method);
        assert!(results[0].errors.is_empty());
        assert!(results[0].failures.is_empty());
        assert!(h.queue.is_empty());
        assert_eq!(h.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_batch_lifecycle() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;

        let info = h.orchestrator.batch_info(&batch_id).await.unwrap();
        assert_eq!(info.num_units, None);
        assert!(h.orchestrator.batch_results(&batch_id, 0).await.unwrap().is_empty());

        assert_eq!(h.drain(&["initialize_batch"]).await, 1);
        let info = h.orchestrator.batch_info(&batch_id).await.unwrap();
        assert_eq!(info.num_units, Some(2));
        assert_eq!(
            info.test_unit_methods.keys().cloned().collect::<Vec<_>>(),
            vec![
                format!("{}.SimpleTestCase.test_fail", ONE_TESTCASE),
                format!("{}.SimpleTestCase.test_pass", ONE_TESTCASE),
            ]
        );
        assert!(h.orchestrator.batch_results(&batch_id, 0).await.unwrap().is_empty());

        assert_eq!(h.drain(&["run_test_unit"]).await, 2);
        let results = h.orchestrator.batch_results(&batch_id, 0).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].failures.len(), 1);
        assert!(results[1].failures.is_empty());

        assert_eq!(
            h.orchestrator.batch_results(&batch_id, 1).await.unwrap().len(),
            1
        );
        assert!(h.orchestrator.batch_results(&batch_id, 2).await.unwrap().is_empty());
        assert!(matches!(
            h.orchestrator.batch_results(&batch_id, 3).await,
            Err(OrchestratorError::StartOutOfRange {
                start: 3,
                num_units: 2
            })
        ));

        assert_eq!(h.drain(&["delete_batch"]).await, 1);
        assert_eq!(h.store.record_count(), 0);
        assert!(matches!(
            h.orchestrator.batch_info(&batch_id).await,
            Err(OrchestratorError::UnknownBatch(_))
        ));
    }

    #[tokio::test]
    async fn test_results_stop_at_first_unfinished_unit() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.drain(&["initialize_batch"]).await;

        h.orchestrator
            .run_unit(
                &format!("{}.SimpleTestCase.test_pass", ONE_TESTCASE),
                &task_key(&batch_id, 1),
            )
            .await
            .unwrap();
        assert!(h.orchestrator.batch_results(&batch_id, 0).await.unwrap().is_empty());
        assert_eq!(
            h.orchestrator.batch_results(&batch_id, 1).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rerunning_unit_overwrites_result() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.drain(&["initialize_batch"]).await;
        let records_before = h.store.record_count();

        let name = format!("{}.SimpleTestCase.test_fail", ONE_TESTCASE);
        let key = task_key(&batch_id, 0);
        h.orchestrator.run_unit(&name, &key).await.unwrap();
        h.orchestrator.run_unit(&name, &key).await.unwrap();

        assert_eq!(h.store.record_count(), records_before);
        let results = h.orchestrator.batch_results(&batch_id, 0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].failures.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_name_still_starts_batch() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start("sample_package.no_such_module").await;
        h.drain(&["initialize_batch"]).await;

        let info = h.orchestrator.batch_info(&batch_id).await.unwrap();
        assert_eq!(info.num_units, Some(0));
        assert_eq!(info.load_errors.len(), 1);
        assert_eq!(info.load_errors[0].name(), "sample_package.no_such_module");
    }

    #[tokio::test]
    async fn test_cleanup_reschedules_while_progressing() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.drain(&["initialize_batch"]).await;
        h.queue.take_all();

        h.orchestrator
            .run_unit(
                &format!("{}.SimpleTestCase.test_fail", ONE_TESTCASE),
                &task_key(&batch_id, 0),
            )
            .await
            .unwrap();

        h.orchestrator.delete_batch(&batch_id, 0).await.unwrap();
        let queued = h.queue.take_all();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0].call,
            DeferredCall::DeleteBatch {
                batch_key: batch_id.clone(),
                num_done: 1
            }
        );
        assert!(h.orchestrator.batch_info(&batch_id).await.is_ok());

        h.orchestrator.delete_batch(&batch_id, 1).await.unwrap();
        assert!(h.queue.is_empty());
        assert_eq!(h.store.record_count(), 0);

        h.orchestrator.delete_batch(&batch_id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_discovery() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.queue.take_all();

        h.orchestrator.delete_batch(&batch_id, 0).await.unwrap();
        assert_eq!(h.queue.len(), 1);
        assert!(h.orchestrator.batch_info(&batch_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.drain(&["initialize_batch"]).await;
        let queued = h.queue.len();

        h.orchestrator
            .initialize_batch(ONE_TESTCASE, &batch_id)
            .await
            .unwrap();
        assert_eq!(h.queue.len(), queued);
    }

    #[tokio::test]
    async fn test_large_results_use_blobs_and_are_collected() {
        let h = harness(StorageMode::Deferred, 64);
        let batch_id = h.start(ONE_TESTCASE).await;
        h.drain(&["initialize_batch", "run_test_unit"]).await;
        assert!(h.store.blob_count() > 0);

        let results = h.orchestrator.batch_results(&batch_id, 0).await.unwrap();
        assert_eq!(results.len(), 2);

        // Holders still refer to their blobs: nothing is collected yet.
        let blobs = h.store.blob_count();
        let blob_calls: Vec<_> = h
            .queue
            .take_all()
            .into_iter()
            .filter(|task| task.call.name() == "delete_blob_if_done")
            .collect();
        assert_eq!(blob_calls.len(), blobs);
        for task in &blob_calls {
            h.orchestrator.execute(task.call.clone()).await.unwrap();
        }
        assert_eq!(h.store.blob_count(), blobs);

        h.orchestrator.delete_batch(&batch_id, 2).await.unwrap();
        assert_eq!(h.store.record_count(), 0);
        for task in blob_calls {
            h.orchestrator.execute(task.call).await.unwrap();
        }
        assert_eq!(h.store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_get_methods_and_object_type() {
        let h = harness(StorageMode::Deferred, 1_000_000);
        let info = h.orchestrator.get_methods(ONE_TESTCASE).await.unwrap();
        assert_eq!(info.method_names.len(), 2);
        assert!(info.load_errors.is_empty());

        let info = h.orchestrator.get_methods("").await.unwrap();
        assert_eq!(info.load_errors.len(), 1);

        assert_eq!(
            h.orchestrator.object_type(ONE_TESTCASE).await.unwrap().object_type,
            "module"
        );
        assert_eq!(h.orchestrator.object_type("").await.unwrap().object_type, "root");
    }
}
