//! Worker pool counters and per-worker state.
//!
//! Counters are shared by all worker loops and the pool handle and use
//! relaxed atomics; a [`PoolStats`] snapshot is therefore not a consistent
//! cut across fields while work is in flight.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::TaskError;

/// Lifecycle of a single worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for the next job.
    Idle,
    /// Running a job's task.
    Processing,
    /// Left the loop after queue closure or cancellation.
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Processing => 1,
            Self::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Processing,
            _ => Self::Stopped,
        }
    }
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Jobs whose task returned a value.
    pub completed: u64,
    /// Jobs whose task returned an error.
    pub failed: u64,
    /// Jobs whose task panicked. Not included in `failed`.
    pub panicked: u64,
    /// Jobs being processed right now.
    pub active: usize,
    /// Highest `active` value observed.
    pub peak_active: usize,
}

/// Shared counters behind [`PoolStats`].
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one job as processing until the returned guard drops.
    pub(crate) fn begin(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_active.fetch_max(now, Ordering::AcqRel);
        ActiveGuard {
            counters: Arc::clone(self),
        }
    }

    pub(crate) fn record_outcome<T>(&self, outcome: &Result<T, TaskError>) {
        let counter = match outcome {
            Ok(_) => &self.completed,
            Err(TaskError::Panicked(_)) => &self.panicked,
            Err(TaskError::Failed(_)) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Acquire),
            peak_active: self.peak_active.load(Ordering::Acquire),
        }
    }
}

/// Decrements the active count on drop, so every exit path is covered.
pub(crate) struct ActiveGuard {
    counters: Arc<PoolCounters>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One state slot per worker.
#[derive(Debug)]
pub(crate) struct WorkerStates(Box<[AtomicU8]>);

impl WorkerStates {
    pub(crate) fn new(workers: usize) -> Self {
        Self(
            (0..workers)
                .map(|_| AtomicU8::new(WorkerState::Idle.as_u8()))
                .collect(),
        )
    }

    pub(crate) fn set(&self, worker: usize, state: WorkerState) {
        if let Some(slot) = self.0.get(worker) {
            slot.store(state.as_u8(), Ordering::Release);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerState> {
        self.0
            .iter()
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }
}
