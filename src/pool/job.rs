//! Jobs submitted to a [`WorkerPool`](super::WorkerPool) and the results
//! they produce.

use std::fmt;

use crate::error::TaskError;
use crate::task::BoxTask;

/// A task paired with the caller's correlation key.
pub(crate) struct Job<K, T> {
    pub(crate) id: K,
    pub(crate) task: BoxTask<T>,
}

impl<K: fmt::Debug, T> fmt::Debug for Job<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of one job. Exactly one of value and error is present.
#[derive(Debug, Clone)]
pub struct JobResult<K, T> {
    id: K,
    outcome: Result<T, TaskError>,
}

impl<K, T> JobResult<K, T> {
    pub(crate) fn new(id: K, outcome: Result<T, TaskError>) -> Self {
        Self { id, outcome }
    }

    /// The identity supplied when the job was submitted.
    pub fn id(&self) -> &K {
        &self.id
    }

    /// The task's value or failure.
    pub fn outcome(&self) -> &Result<T, TaskError> {
        &self.outcome
    }

    /// Returns `true` when the task produced a value.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The value, if the task succeeded.
    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// The failure, if the task failed or panicked.
    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().err()
    }

    /// Splits into identity and outcome.
    pub fn into_parts(self) -> (K, Result<T, TaskError>) {
        (self.id, self.outcome)
    }
}
