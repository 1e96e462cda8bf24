//! Worker pool draining a [`MemoryQueue`].
//!
//! Each worker loops: wait for a ready task, execute it, and on failure put
//! it back with a growing delay until [`RetryPolicy::max_attempts`] is
//! reached. Workers stop when the pool's [`CancellationToken`] is cancelled;
//! a task in flight at that moment is allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{DeferredCall, MemoryQueue, QueuedTask};

/// Runs deferred calls popped off a queue.
#[async_trait]
pub trait CallExecutor: Send + Sync {
    async fn execute(&self, call: DeferredCall) -> anyhow::Result<()>;
}

/// How failed calls are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying a task that has failed `attempt + 1` times.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A fixed set of tokio tasks executing queued calls.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl WorkerPool {
    /// Starts `workers` workers (at least one) over `queue`.
    pub fn spawn(
        queue: Arc<MemoryQueue>,
        executor: Arc<dyn CallExecutor>,
        workers: usize,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let executor = executor.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, queue, executor, retry, token).await;
                })
            })
            .collect();

        Self { handles, token }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancels the workers and waits for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<MemoryQueue>,
    executor: Arc<dyn CallExecutor>,
    retry: RetryPolicy,
    token: CancellationToken,
) {
    debug!("Worker {} started", worker_id);
    loop {
        let task: QueuedTask = tokio::select! {
            _ = token.cancelled() => break,
            task = queue.next_ready() => task,
        };

        let name = task.call.name();
        debug!("Worker {} running {} (attempt {})", worker_id, name, task.attempt + 1);

        if let Err(e) = executor.execute(task.call.clone()).await {
            if task.attempt + 1 >= retry.max_attempts {
                error!(
                    "Giving up on {} after {} attempts: {:#}",
                    name,
                    task.attempt + 1,
                    e
                );
            } else {
                let delay = retry.delay_for(task.attempt);
                warn!("{} failed, retrying in {:?}: {:#}", name, delay, e);
                queue.requeue(task, delay);
            }
        }
    }
    debug!("Worker {} stopped", worker_id);
}
