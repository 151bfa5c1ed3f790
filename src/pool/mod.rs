//! Fixed-size worker pool.
//!
//! [`WorkerPool`] spawns exactly `workers` worker loops via
//! [`tokio_util::task::TaskTracker`]. The number of loops *is* the
//! concurrency bound; no extra semaphore is involved. Jobs go in through a
//! (bounded) job queue and outcomes come out through the result queue in
//! completion order, which is independent of submission order.
//!
//! # Examples
//!
//! ```
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! use taskline::{CancellationToken, WorkerPool};
//!
//! let pool = WorkerPool::new(2).unwrap();
//! for n in 1..=4_u64 {
//!     pool.submit(n, move |_token| async move { Ok(n * n) }).await.unwrap();
//! }
//! pool.shutdown().await.unwrap();
//!
//! let results = pool.results().collect(&CancellationToken::new()).await.unwrap();
//! let mut squares: Vec<u64> = results.iter().filter_map(|r| r.value().copied()).collect();
//! squares.sort();
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! # });
//! ```

mod job;
mod stats;
mod worker;

use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::sync::{CancellationToken, MessageQueue};
use crate::task::boxed;

pub use job::JobResult;
pub use stats::{PoolStats, WorkerState};

use job::Job;
use stats::{PoolCounters, WorkerStates};
use worker::{worker_loop, WorkerContext};

/// Fixed-size set of workers consuming a shared job queue.
///
/// `K` is the caller's correlation key, carried unchanged from
/// [`submit`](WorkerPool::submit) to the matching [`JobResult`]. `T` is the
/// task's value type.
pub struct WorkerPool<K, T> {
    ctx: WorkerContext<K, T>,
    tracker: TaskTracker,
    workers: usize,
}

impl<K, T> WorkerPool<K, T>
where
    K: Send + 'static,
    T: Send + 'static,
{
    /// Starts a pool of `workers` workers under a fresh root token.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `workers` is zero.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_config(&PoolConfig::new(workers), &CancellationToken::new())
    }

    /// Starts a pool sized by `config`. The pool runs under a child of
    /// `token`, so cancelling `token` stops the pool but cancelling the pool
    /// does not touch `token`.
    pub fn with_config(config: &PoolConfig, token: &CancellationToken) -> Result<Self> {
        config.validate()?;

        let ctx = WorkerContext {
            jobs: MessageQueue::bounded(config.job_capacity())?,
            results: MessageQueue::with_capacity(config.result_buffer),
            token: token.child(),
            counters: Arc::new(PoolCounters::default()),
            states: Arc::new(WorkerStates::new(config.workers)),
            live: Arc::new(AtomicUsize::new(config.workers)),
        };

        let tracker = TaskTracker::new();
        for worker_id in 0..config.workers {
            tracker.spawn(worker_loop(worker_id, ctx.clone()));
        }
        debug!(workers = config.workers, "worker pool started");

        Ok(Self {
            ctx,
            tracker,
            workers: config.workers,
        })
    }

    /// Enqueues a job, waiting while the job queue is full.
    ///
    /// The task receives the pool's token so it can observe cancellation.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolShutdown`] once [`shutdown`](WorkerPool::shutdown)
    ///   has started.
    /// - A cancellation error if the pool token fires while waiting.
    pub async fn submit<F, Fut>(&self, id: K, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let job = Job {
            id,
            task: boxed(task),
        };
        match self.ctx.jobs.send(job, &self.ctx.token).await {
            Ok(()) => {
                self.ctx.counters.record_submitted();
                Ok(())
            }
            Err(err) => match Error::from(err) {
                Error::QueueClosed => Err(Error::PoolShutdown),
                other => Err(other),
            },
        }
    }

    /// The queue results are published on. Closed by the last worker to
    /// stop, whether that follows [`shutdown`](WorkerPool::shutdown),
    /// cancellation or dropping the pool, so a consumer draining it
    /// terminates.
    pub fn results(&self) -> MessageQueue<JobResult<K, T>> {
        self.ctx.results.clone()
    }

    /// Stops accepting jobs, lets workers drain the job queue and finish
    /// their current task, then closes the result queue. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the cancellation error whenever the pool token has fired.
    /// Workers then stop early and jobs still queued are discarded.
    pub async fn shutdown(&self) -> Result<()> {
        self.ctx.jobs.close();
        self.tracker.close();
        self.tracker.wait().await;

        let mut discarded = 0_usize;
        while self.ctx.jobs.try_recv().is_ok() {
            discarded += 1;
        }
        self.ctx.results.close();

        if discarded > 0 {
            warn!(discarded, "pool cancelled with jobs still queued");
        }
        self.ctx.token.check()?;
        debug!("worker pool shut down");
        Ok(())
    }

    /// Cancels the pool token. Workers stop at their next suspension point;
    /// running tasks are not interrupted but can observe the token.
    pub fn cancel(&self) {
        self.ctx.token.cancel();
    }

    /// The pool's token.
    pub fn token(&self) -> &CancellationToken {
        &self.ctx.token
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.ctx.counters.snapshot()
    }

    /// State of each worker, indexed by worker id.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.ctx.states.snapshot()
    }
}

impl<K, T> Drop for WorkerPool<K, T> {
    /// Dropping the handle without [`shutdown`](WorkerPool::shutdown) stops
    /// intake; workers drain what is queued, exit on their own, and the last
    /// one closes the result queue.
    fn drop(&mut self) {
        self.ctx.jobs.close();
        self.tracker.close();
    }
}
