//! Hierarchical cancellation with optional deadlines.
//!
//! [`CancellationToken`] wraps [`tokio_util::sync::CancellationToken`] for
//! the parent/child propagation and adds a deadline that every derived token
//! inherits. Deadline expiry is observed lazily: any check made after the
//! deadline cancels the token, so no timer task has to be owned by the
//! caller.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Why a token stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The token or one of its ancestors was cancelled explicitly.
    Cancelled,
    /// The token's (possibly inherited) deadline passed.
    DeadlineExceeded,
}

/// Cooperative, hierarchical cancellation signal.
///
/// Cloning a token yields a handle to the *same* signal. Use
/// [`child`](CancellationToken::child) to derive a token that is cancelled
/// with its parent but can be cancelled on its own without affecting the
/// parent.
///
/// # Examples
///
/// ```
/// use taskline::CancellationToken;
///
/// let root = CancellationToken::new();
/// let child = root.child();
///
/// child.cancel();
/// assert!(child.is_cancelled());
/// assert!(!root.is_cancelled());
///
/// root.cancel();
/// assert!(root.child().is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a root token with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a child token. Cancelling the parent cancels the child; the
    /// child inherits the parent's deadline.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child token that cancels itself `timeout` from now, or at the
    /// inherited deadline if that comes first.
    ///
    /// A timeout too large to represent (such as [`Duration::MAX`]) adds no
    /// deadline of its own; the child keeps only the inherited one.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derives a child token that cancels itself at `deadline`, or at the
    /// inherited deadline if that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(inherited) => inherited.min(deadline),
            None => deadline,
        };
        Self {
            inner: self.inner.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this token and all tokens derived from it. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns `true` if this token, an ancestor, or the deadline has fired.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.is_cancelled() {
            return true;
        }
        if self.deadline_elapsed() {
            self.inner.cancel();
            return true;
        }
        false
    }

    /// Returns why the token stopped, or `None` while it is still live.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        if self.deadline_elapsed() {
            Some(CancelReason::DeadlineExceeded)
        } else {
            Some(CancelReason::Cancelled)
        }
    }

    /// Returns `Err` with the matching cancellation error if the token fired.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            None => Ok(()),
            Some(CancelReason::Cancelled) => Err(Error::Cancelled),
            Some(CancelReason::DeadlineExceeded) => Err(Error::DeadlineExceeded),
        }
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when the token has no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Suspends until the token is cancelled or its deadline elapses.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.inner.cancel();
                    }
                }
            }
            None => self.inner.cancelled().await,
        }
    }

    /// Runs `future` until it completes or the token fires, whichever is
    /// first. A future that is dropped this way is not resumed.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(self.error()),
            output = future => Ok(output),
        }
    }

    /// The error describing this token's cancellation. Only meaningful once
    /// the token has fired.
    pub(crate) fn error(&self) -> Error {
        match self.reason() {
            Some(CancelReason::DeadlineExceeded) => Error::DeadlineExceeded,
            _ => Error::Cancelled,
        }
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_descendants() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let root = CancellationToken::new();
        let child = root.child();
        let sibling = root.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
        assert!(!sibling.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn test_live_token_has_no_reason() {
        let token = CancellationToken::new();
        assert_eq!(token.reason(), None);
        assert!(token.check().is_ok());
        assert!(token.remaining().is_none());
    }

    #[tokio::test]
    async fn test_deadline_cancels_token() {
        let token = CancellationToken::new().with_timeout(Duration::from_millis(20));
        assert!(!token.is_cancelled());

        token.cancelled().await;

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
        assert!(matches!(token.check(), Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_child_inherits_earlier_deadline() {
        let parent = CancellationToken::new().with_timeout(Duration::from_millis(20));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn test_unrepresentable_timeout_adds_no_deadline() {
        let token = CancellationToken::new().with_timeout(Duration::MAX);
        assert_eq!(token.deadline(), None);
        assert!(!token.is_cancelled());

        let bounded = CancellationToken::new().with_timeout(Duration::from_secs(60));
        let child = bounded.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), bounded.deadline());

        bounded.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_observed_deadline_cancels_descendants() {
        let parent = CancellationToken::new().with_timeout(Duration::from_millis(10));
        let child = parent.child();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_until_cancelled_completes() {
        let token = CancellationToken::new();
        let value = token.run_until_cancelled(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_until_cancelled_stops_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_until_cancelled_reports_deadline() {
        let token = CancellationToken::new().with_timeout(Duration::from_millis(10));
        let result = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }
}
