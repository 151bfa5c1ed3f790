//! The unit of work and the guard every component runs it under.
//!
//! A task is an opaque async callable that receives the cancellation token
//! of whatever runs it and yields `anyhow::Result<T>`. The engine never
//! looks inside; it only turns the outcome (including a panic) into data.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::TaskError;
use crate::sync::CancellationToken;

/// Boxed future produced by a task.
pub type TaskFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Type-erased task, owned by whichever component invokes it.
pub(crate) type BoxTask<T> = Box<dyn FnOnce(CancellationToken) -> TaskFuture<T> + Send>;

/// Erases the concrete closure and future types of a task.
pub(crate) fn boxed<F, Fut, T>(task: F) -> BoxTask<T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    Box::new(move |token| task(token).boxed())
}

/// Polls `future` to completion, converting an error into
/// [`TaskError::Failed`] and a panic into [`TaskError::Panicked`].
///
/// Panics raised while *creating* the future are caught too when the call
/// happens inside the awaited future (e.g. `async move { task(token).await }`).
pub(crate) async fn run_guarded<F, T>(future: F) -> Result<T, TaskError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::from(err)),
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}
