//! Supervision of a set of tasks with first-error capture.
//!
//! [`ErrorGroup`] starts each registered task under one shared group token.
//! The first task to fail (by completion order) is recorded and the group
//! token is cancelled, so siblings that watch the token can stop early.
//! Later failures are discarded. [`ErrorGroup::wait`] blocks until every task
//! has finished and returns the recorded failure, if any.
//!
//! Tasks that ignore the token run to completion; the group never aborts
//! them.
//!
//! # Examples
//!
//! ```
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! use taskline::{CancellationToken, Error, ErrorGroup};
//!
//! let group = ErrorGroup::new(&CancellationToken::new());
//! group.go_named("fetch", |_token| async { Ok(()) });
//! group.go_named("parse", |_token| async { Err(anyhow::anyhow!("bad header")) });
//!
//! match group.wait().await {
//!     Err(Error::Task { task, .. }) => assert_eq!(task, "parse"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! # });
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument};

use crate::error::{Error, Result, TaskError};
use crate::sync::{CancellationToken, Semaphore};
use crate::task::run_guarded;

/// The first failure seen by a group and the task that reported it.
///
/// Written at most once per group.
#[derive(Debug, Clone, Default)]
pub struct ErrorRecord {
    first_error: Option<TaskError>,
    reported_by: Option<String>,
}

impl ErrorRecord {
    /// The first failure, if any task failed.
    pub fn first_error(&self) -> Option<&TaskError> {
        self.first_error.as_ref()
    }

    /// Identity of the task that failed first.
    pub fn reported_by(&self) -> Option<&str> {
        self.reported_by.as_deref()
    }

    /// Returns `true` if no failure has been recorded.
    pub fn is_empty(&self) -> bool {
        self.first_error.is_none()
    }

    /// Stores the failure unless one is already present. Returns `true` if
    /// this call won.
    fn record(&mut self, task: &str, error: TaskError) -> bool {
        if self.first_error.is_some() {
            return false;
        }
        self.first_error = Some(error);
        self.reported_by = Some(task.to_string());
        true
    }
}

/// A set of tasks sharing one token, failing as a unit.
pub struct ErrorGroup {
    token: CancellationToken,
    tracker: TaskTracker,
    record: Arc<Mutex<ErrorRecord>>,
    limit: Option<Semaphore>,
    registered: AtomicUsize,
}

impl ErrorGroup {
    /// Creates a group whose token is a child of `token`.
    ///
    /// Cancelling `token` cancels the group; a failure inside the group
    /// cancels only the group token.
    pub fn new(token: &CancellationToken) -> Self {
        Self {
            token: token.child(),
            tracker: TaskTracker::new(),
            record: Arc::new(Mutex::new(ErrorRecord::default())),
            limit: None,
            registered: AtomicUsize::new(0),
        }
    }

    /// Allows at most `limit` tasks to run at once. Tasks beyond the limit
    /// wait for a slot inside the group. A task still waiting when the
    /// group token fires never runs and is reported as failed with the
    /// cancellation error, so [`wait`](ErrorGroup::wait) cannot succeed
    /// without every task having run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `limit` is zero.
    pub fn with_limit(mut self, limit: usize) -> Result<Self> {
        self.limit = Some(Semaphore::new(limit)?);
        Ok(self)
    }

    /// Registers and starts a task named `task-<n>`, where `n` is its
    /// registration index.
    pub fn go<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let index = self.registered.fetch_add(1, Ordering::Relaxed);
        self.spawn(format!("task-{index}"), task);
    }

    /// Registers and starts a task under `name`. The name is what
    /// [`wait`](ErrorGroup::wait) reports if this task fails first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn go_named<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registered.fetch_add(1, Ordering::Relaxed);
        self.spawn(name.into(), task);
    }

    fn spawn<F, Fut>(&self, name: String, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let record = Arc::clone(&self.record);
        let limit = self.limit.clone();
        let span = tracing::debug_span!("group", task = %name);

        self.tracker.spawn(
            async move {
                let _permit = match &limit {
                    Some(semaphore) => match semaphore.acquire(&token).await {
                        Ok(permit) => Some(permit),
                        Err(err) => {
                            debug!(error = %err, "task skipped before it started");
                            record
                                .lock()
                                .record(&name, TaskError::from(anyhow::Error::new(err)));
                            return;
                        }
                    },
                    None => None,
                };

                let task_token = token.clone();
                let Err(error) = run_guarded(async move { task(task_token).await }).await else {
                    debug!("task finished");
                    return;
                };

                if error.is_panic() {
                    warn!(error = %error, "task panicked");
                }
                if record.lock().record(&name, error) {
                    debug!("first failure, cancelling group");
                    token.cancel();
                } else {
                    debug!("later failure discarded");
                }
            }
            .instrument(span),
        );
    }

    /// The group token handed to every task.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of tasks registered so far.
    pub fn len(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    /// Returns `true` if no task has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the failure record. Useful while tasks are still running.
    pub fn record(&self) -> ErrorRecord {
        self.record.lock().clone()
    }

    /// Waits for every registered task to finish and returns the first
    /// failure as [`Error::Task`], or `Ok(())` if none failed.
    ///
    /// Consumes the group, so no task can be registered afterwards.
    pub async fn wait(self) -> Result<()> {
        self.tracker.close();
        self.tracker.wait().await;

        let record = std::mem::take(&mut *self.record.lock());
        match (record.first_error, record.reported_by) {
            (Some(source), Some(task)) => {
                debug!(task = %task, "group finished with failure");
                Err(Error::Task { task, source })
            }
            _ => {
                debug!(tasks = self.len(), "group finished");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_group_succeeds() {
        let group = ErrorGroup::new(&CancellationToken::new());
        assert!(group.is_empty());
        group.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_names_follow_registration_order() {
        let group = ErrorGroup::new(&CancellationToken::new());
        group.go(|_token| async { Ok(()) });
        group.go(|_token| async { Err(anyhow::anyhow!("second")) });
        assert_eq!(group.len(), 2);

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, Error::Task { ref task, .. } if task == "task-1"));
    }

    #[tokio::test]
    async fn test_record_is_first_write_wins() {
        let mut record = ErrorRecord::default();
        assert!(record.record("a", TaskError::msg("first")));
        assert!(!record.record("b", TaskError::msg("second")));
        assert_eq!(record.reported_by(), Some("a"));
        assert_eq!(record.first_error().unwrap().to_string(), "first");
    }

    #[tokio::test]
    async fn test_failure_cancels_group_but_not_parent() {
        let parent = CancellationToken::new();
        let group = ErrorGroup::new(&parent);
        let group_token = group.token().clone();
        group.go(|_token| async { Err(anyhow::anyhow!("boom")) });

        assert!(group.wait().await.is_err());
        assert!(group_token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_limit_skips_waiting_tasks_after_failure() {
        let group = ErrorGroup::new(&CancellationToken::new())
            .with_limit(1)
            .unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        group.go(|_token| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow::anyhow!("first"))
        });
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            group.go(move |_token| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(group.wait().await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_limit_reports_tasks_skipped_by_parent_cancel() {
        let parent = CancellationToken::new();
        let group = ErrorGroup::new(&parent).with_limit(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        group.go_named("holder", |token| async move {
            token.cancelled().await;
            Ok(())
        });
        for index in 0..2 {
            let ran = Arc::clone(&ran);
            group.go_named(format!("queued-{index}"), move |_token| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        match group.wait().await.unwrap_err() {
            Error::Task { task, source } => {
                assert!(task.starts_with("queued-"));
                assert_eq!(source.to_string(), "operation cancelled");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        assert!(ErrorGroup::new(&CancellationToken::new())
            .with_limit(0)
            .is_err());
    }
}
