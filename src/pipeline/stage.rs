//! A single pipeline stage.
//!
//! A stage reads its input queue until the queue is closed and drained or the
//! token fires, applies its transform to each item, writes the outcome to its
//! output queue, and then closes the output exactly once. Failures (errors or
//! panics in the transform) are written downstream as [`StageError`] items,
//! never dropped. A full output queue blocks the stage, which is the only
//! flow control between stages.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, Instrument};

use crate::config::DEFAULT_STAGE_BUFFER;
use crate::error::TaskError;
use crate::sync::{CancellationToken, MessageQueue};
use crate::task::run_guarded;

/// Item passed between stages: a value, or the failure that replaced it.
pub type Flow<T> = Result<T, StageError>;

/// A transform failure, tagged with the stage that produced it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("stage '{stage}' failed: {error}")]
pub struct StageError {
    /// Name of the failing stage.
    pub stage: String,
    /// The transform's failure.
    #[source]
    pub error: TaskError,
}

/// Starts a stage named `stage` over raw input items and returns its output
/// queue. See [`named_stage`].
pub fn stage<T, U, F, Fut>(
    input: MessageQueue<T>,
    transform: F,
    token: &CancellationToken,
) -> MessageQueue<Flow<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    named_stage("stage", input, transform, token)
}

/// Starts a stage over raw input items and returns its output queue.
/// Failures are tagged with `name`.
///
/// The output queue holds up to the default stage buffer. Must be called
/// from within a tokio runtime.
pub fn named_stage<T, U, F, Fut>(
    name: impl Into<String>,
    input: MessageQueue<T>,
    transform: F,
    token: &CancellationToken,
) -> MessageQueue<Flow<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    let output = MessageQueue::with_capacity(Some(DEFAULT_STAGE_BUFFER));
    spawn_source_stage(
        Arc::from(name.into()),
        input,
        output.clone(),
        token.clone(),
        Arc::new(transform),
    );
    output
}

/// Starts a stage named `stage` downstream of another stage. See
/// [`named_chain`].
pub fn chain<T, U, F, Fut>(
    input: MessageQueue<Flow<T>>,
    transform: F,
    token: &CancellationToken,
) -> MessageQueue<Flow<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    named_chain("stage", input, transform, token)
}

/// Starts a stage downstream of another stage. Upstream failures are
/// forwarded untouched; only values reach `transform`, and its own failures
/// are tagged with `name`.
pub fn named_chain<T, U, F, Fut>(
    name: impl Into<String>,
    input: MessageQueue<Flow<T>>,
    transform: F,
    token: &CancellationToken,
) -> MessageQueue<Flow<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    let output = MessageQueue::with_capacity(Some(DEFAULT_STAGE_BUFFER));
    spawn_chained_stage(
        Arc::from(name.into()),
        input,
        output.clone(),
        token.clone(),
        Arc::new(transform),
    );
    output
}

pub(crate) fn spawn_source_stage<T, U, F, Fut>(
    name: Arc<str>,
    input: MessageQueue<T>,
    output: MessageQueue<Flow<U>>,
    token: CancellationToken,
    transform: Arc<F>,
) where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    let span = tracing::debug_span!("stage", stage = %name);
    let step_name = Arc::clone(&name);
    let step = move |item: T| apply(Arc::clone(&step_name), Arc::clone(&transform), item);
    tokio::spawn(run_stage(name, input, output, token, step).instrument(span));
}

pub(crate) fn spawn_chained_stage<T, U, F, Fut>(
    name: Arc<str>,
    input: MessageQueue<Flow<T>>,
    output: MessageQueue<Flow<U>>,
    token: CancellationToken,
    transform: Arc<F>,
) where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    let span = tracing::debug_span!("stage", stage = %name);
    let step_name = Arc::clone(&name);
    let step = move |item: Flow<T>| {
        let name = Arc::clone(&step_name);
        let transform = Arc::clone(&transform);
        async move {
            match item {
                Ok(value) => apply(name, transform, value).await,
                Err(upstream) => Err(upstream),
            }
        }
    };
    tokio::spawn(run_stage(name, input, output, token, step).instrument(span));
}

async fn apply<T, U, F, Fut>(name: Arc<str>, transform: Arc<F>, item: T) -> Flow<U>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<U>>,
{
    run_guarded(async move { (*transform)(item).await })
        .await
        .map_err(|error| StageError {
            stage: name.to_string(),
            error,
        })
}

async fn run_stage<I, O, S, Fut>(
    name: Arc<str>,
    input: MessageQueue<I>,
    output: MessageQueue<Flow<O>>,
    token: CancellationToken,
    step: S,
) where
    S: Fn(I) -> Fut,
    Fut: Future<Output = Flow<O>>,
{
    debug!("stage started");
    let mut processed = 0_u64;
    let mut failed = 0_u64;

    loop {
        let item = match input.recv(&token).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "stage cancelled");
                break;
            }
        };

        let outcome = step(item).await;
        if outcome.is_err() {
            failed += 1;
        }
        if let Err(err) = output.send(outcome, &token).await {
            debug!(error = %err.error(), "stage output rejected, stopping");
            break;
        }
        processed += 1;
    }

    output.close();
    debug!(stage = %name, processed, failed, "stage finished");
}
