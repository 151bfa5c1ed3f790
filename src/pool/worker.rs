//! Worker task loop.
//!
//! Each worker pulls jobs from the shared job queue (competing consumers),
//! runs the task to completion, and publishes a [`JobResult`]. Task failures
//! and panics become results; the worker keeps going. A worker stops when the
//! job queue is closed and drained, or when the pool token fires while it is
//! waiting for a job. It never abandons a task mid-execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TaskError;
use crate::pool::job::{Job, JobResult};
use crate::pool::stats::{PoolCounters, WorkerState, WorkerStates};
use crate::sync::{CancellationToken, MessageQueue, TrySendError};
use crate::task::run_guarded;

/// Everything a worker loop shares with the pool handle.
pub(crate) struct WorkerContext<K, T> {
    pub(crate) jobs: MessageQueue<Job<K, T>>,
    pub(crate) results: MessageQueue<JobResult<K, T>>,
    pub(crate) token: CancellationToken,
    pub(crate) counters: Arc<PoolCounters>,
    pub(crate) states: Arc<WorkerStates>,
    /// Worker loops still running. The last one out closes `results`.
    pub(crate) live: Arc<AtomicUsize>,
}

impl<K, T> Clone for WorkerContext<K, T> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            results: self.results.clone(),
            token: self.token.clone(),
            counters: Arc::clone(&self.counters),
            states: Arc::clone(&self.states),
            live: Arc::clone(&self.live),
        }
    }
}

/// Main worker loop: `Idle -> Processing -> Idle ... -> Stopped`.
pub(crate) async fn worker_loop<K, T>(worker_id: usize, ctx: WorkerContext<K, T>)
where
    K: Send + 'static,
    T: Send + 'static,
{
    debug!(worker = worker_id, "worker started");

    loop {
        ctx.states.set(worker_id, WorkerState::Idle);

        let job = match ctx.jobs.recv(&ctx.token).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(worker = worker_id, "job queue drained");
                break;
            }
            Err(err) => {
                debug!(worker = worker_id, error = %err, "worker cancelled");
                break;
            }
        };

        ctx.states.set(worker_id, WorkerState::Processing);
        let Job { id, task } = job;
        let outcome = {
            let _active = ctx.counters.begin();
            let token = ctx.token.clone();
            run_guarded(async move { task(token).await }).await
        };
        ctx.counters.record_outcome(&outcome);

        if let Err(TaskError::Panicked(message)) = &outcome {
            warn!(worker = worker_id, panic = %message, "task panicked, worker continues");
        }

        publish(worker_id, &ctx, JobResult::new(id, outcome)).await;
    }

    ctx.states.set(worker_id, WorkerState::Stopped);
    debug!(worker = worker_id, "worker stopped");

    if ctx.live.fetch_sub(1, Ordering::AcqRel) == 1 {
        ctx.results.close();
        debug!("last worker stopped, result queue closed");
    }
}

/// Publishes a result without waiting when there is room, so results of
/// tasks that finished after cancellation are still delivered to an
/// unbounded or non-full result queue.
async fn publish<K, T>(worker_id: usize, ctx: &WorkerContext<K, T>, result: JobResult<K, T>) {
    let result = match ctx.results.try_send(result) {
        Ok(()) => return,
        Err(TrySendError::Closed(_)) => {
            warn!(worker = worker_id, "result queue closed, dropping result");
            return;
        }
        Err(TrySendError::Full(result)) => result,
    };

    if let Err(err) = ctx.results.send(result, &ctx.token).await {
        warn!(worker = worker_id, error = %err.error(), "dropping result");
    }
}
