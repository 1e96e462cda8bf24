//! Deferred calls and the durable work queue.
//!
//! Every piece of asynchronous batch work is a [`DeferredCall`]: a plain
//! serializable value naming the operation and its arguments. Calls are
//! pushed onto a [`TaskQueue`] with an optional countdown and executed
//! later, at least once, by whoever drains the queue.
//!
//! ```text
//!   Orchestrator / JsonHolder
//!            │ defer / defer_multi (chunks of 100)
//!            ▼
//!      ┌───────────┐   next_ready()   ┌──────────────┐   execute()
//!      │ TaskQueue │ ───────────────► │  WorkerPool  │ ────────────► Orchestrator
//!      └───────────┘ ◄─────────────── └──────────────┘
//!                       requeue on error
//! ```
//!
//! [`MemoryQueue`] is the in-process implementation used by `aeta serve`
//! and the test suite; any other substrate only has to implement
//! [`TaskQueue::add`].

pub mod worker;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

pub use worker::{CallExecutor, WorkerPool};

/// Maximum number of calls handed to [`TaskQueue::add`] at once.
pub const MAX_TASKS_PER_ADD: usize = 100;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by a work queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue no longer accepts work.
    #[error("queue '{0}' is closed")]
    Closed(String),

    /// More calls than one add accepts.
    #[error("too many calls in one add: {0} (max {MAX_TASKS_PER_ADD})")]
    TooManyCalls(usize),

    /// Substrate-specific failure.
    #[error("queue error: {0}")]
    Other(String),
}

/// A unit of deferred batch work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DeferredCall {
    /// Discover the units of a pending batch and schedule them.
    InitializeBatch { fullname: String, batch_key: String },

    /// Run one unit and store its result in the task record.
    RunTestUnit { fullname: String, task_key: String },

    /// Delete a batch once its units stop making progress.
    DeleteBatch { batch_key: String, num_done: usize },

    /// Delete a blob once its holder no longer refers to it.
    DeleteBlobIfDone { holder_key: String, blob_key: String },
}

impl DeferredCall {
    /// Short name used in logs and task names.
    pub fn name(&self) -> &'static str {
        match self {
            DeferredCall::InitializeBatch { .. } => "initialize_batch",
            DeferredCall::RunTestUnit { .. } => "run_test_unit",
            DeferredCall::DeleteBatch { .. } => "delete_batch",
            DeferredCall::DeleteBlobIfDone { .. } => "delete_blob_if_done",
        }
    }
}

/// A call together with how long to wait before running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCall {
    #[serde(flatten)]
    pub call: DeferredCall,
    #[serde(default, with = "duration_secs")]
    pub countdown: Duration,
}

impl QueuedCall {
    pub fn now(call: DeferredCall) -> Self {
        Self {
            call,
            countdown: Duration::ZERO,
        }
    }

    pub fn after(call: DeferredCall, countdown: Duration) -> Self {
        Self { call, countdown }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// A durable, at-least-once work queue.
///
/// Implementations must accept up to [`MAX_TASKS_PER_ADD`] calls per add.
/// A call may run more than once; every [`DeferredCall`] is idempotent.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn add(&self, queue_name: &str, calls: Vec<QueuedCall>) -> QueueResult<()>;
}

/// Enqueues a single call.
pub async fn defer(queue: &dyn TaskQueue, queue_name: &str, call: QueuedCall) -> QueueResult<()> {
    queue.add(queue_name, vec![call]).await
}

/// Enqueues any number of calls, [`MAX_TASKS_PER_ADD`] at a time.
pub async fn defer_multi(
    queue: &dyn TaskQueue,
    queue_name: &str,
    calls: Vec<QueuedCall>,
) -> QueueResult<()> {
    let mut calls = calls.into_iter().peekable();
    while calls.peek().is_some() {
        let chunk: Vec<QueuedCall> = calls.by_ref().take(MAX_TASKS_PER_ADD).collect();
        queue.add(queue_name, chunk).await?;
    }
    Ok(())
}

/// A call waiting in a [`MemoryQueue`].
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub queue_name: String,
    pub call: DeferredCall,
    pub eta: Instant,
    pub attempt: u32,
}

/// In-process [`TaskQueue`].
///
/// Tasks are kept in insertion order; [`next_ready`](Self::next_ready)
/// hands out the earliest-inserted task whose countdown has elapsed.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    tasks: Mutex<Vec<QueuedTask>>,
    added: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting, ready or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every waiting task.
    pub fn snapshot(&self) -> Vec<QueuedTask> {
        self.lock().clone()
    }

    /// Removes and returns every waiting task, ready or not.
    pub fn take_all(&self) -> Vec<QueuedTask> {
        std::mem::take(&mut *self.lock())
    }

    /// Removes the first task whose countdown has elapsed.
    pub fn pop_ready(&self) -> Option<QueuedTask> {
        let now = Instant::now();
        let mut tasks = self.lock();
        let index = tasks.iter().position(|task| task.eta <= now)?;
        Some(tasks.remove(index))
    }

    /// Waits for the next ready task.
    ///
    /// Sleeps until the earliest countdown elapses or new work arrives,
    /// whichever happens first.
    pub async fn next_ready(&self) -> QueuedTask {
        loop {
            let added = self.added.notified();
            tokio::pin!(added);
            added.as_mut().enable();

            if let Some(task) = self.pop_ready() {
                return task;
            }

            let earliest = self.lock().iter().map(|task| task.eta).min();
            match earliest {
                Some(eta) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(eta) => {}
                        _ = &mut added => {}
                    }
                }
                None => added.await,
            }
        }
    }

    /// Puts a task back, to run again after `delay`.
    pub fn requeue(&self, mut task: QueuedTask, delay: Duration) {
        task.attempt += 1;
        task.eta = Instant::now() + delay;
        self.lock().push(task);
        self.added.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueuedTask>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn add(&self, queue_name: &str, calls: Vec<QueuedCall>) -> QueueResult<()> {
        if calls.len() > MAX_TASKS_PER_ADD {
            return Err(QueueError::TooManyCalls(calls.len()));
        }
        let now = Instant::now();
        {
            let mut tasks = self.lock();
            for queued in calls {
                tracing::debug!(
                    "Queued {} on '{}' (countdown {:?})",
                    queued.call.name(),
                    queue_name,
                    queued.countdown
                );
                tasks.push(QueuedTask {
                    queue_name: queue_name.to_string(),
                    call: queued.call,
                    eta: now + queued.countdown,
                    attempt: 0,
                });
            }
        }
        self.added.notify_waiters();
        Ok(())
    }
}
