//! Fan-out and fan-in.
//!
//! [`fan_out`] runs several replicas of the same stage over one shared input
//! queue. The replicas compete for items, so every item is processed by
//! exactly one replica. [`fan_in`] merges any number of queues into one and
//! closes it only after every source has closed.
//!
//! There is no ordering guarantee across replicas or across fan-in sources:
//! merged output arrives in whatever order the readers deliver it. Callers
//! that need an order must re-sequence by a key they carry in the items.

use std::future::Future;
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, Instrument};

use crate::config::DEFAULT_STAGE_BUFFER;
use crate::error::{Error, Result};
use crate::pipeline::stage::{spawn_source_stage, Flow};
use crate::sync::{CancellationToken, MessageQueue};

/// Starts `replicas` copies of a stage, all reading `input`, and returns one
/// output queue per replica.
///
/// Failures are tagged with the replica's name (`replica-<n>`).
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] when `replicas` is zero.
pub fn fan_out<T, U, F, Fut>(
    input: MessageQueue<T>,
    replicas: usize,
    transform: F,
    token: &CancellationToken,
) -> Result<Vec<MessageQueue<Flow<U>>>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    if replicas == 0 {
        return Err(Error::invalid_config("fan-out needs at least one replica"));
    }
    let transform = Arc::new(transform);
    let outputs = (0..replicas)
        .map(|replica| {
            let output = MessageQueue::with_capacity(Some(DEFAULT_STAGE_BUFFER));
            spawn_source_stage(
                Arc::from(format!("replica-{replica}")),
                input.clone(),
                output.clone(),
                token.clone(),
                Arc::clone(&transform),
            );
            output
        })
        .collect();
    debug!(replicas, "fan-out started");
    Ok(outputs)
}

/// Merges `sources` into one queue.
///
/// One reader per source forwards items into the merged queue. The merged
/// queue closes once every reader has stopped, i.e. after every source has
/// closed or the token has fired. An empty `sources` yields a queue that is
/// already closed.
pub fn fan_in<T>(sources: Vec<MessageQueue<T>>, token: &CancellationToken) -> MessageQueue<T>
where
    T: Send + 'static,
{
    fan_in_with_buffer(sources, token, DEFAULT_STAGE_BUFFER)
}

pub(crate) fn fan_in_with_buffer<T>(
    sources: Vec<MessageQueue<T>>,
    token: &CancellationToken,
    buffer: usize,
) -> MessageQueue<T>
where
    T: Send + 'static,
{
    let merged = MessageQueue::with_capacity(Some(buffer));
    if sources.is_empty() {
        merged.close();
        return merged;
    }

    let tracker = TaskTracker::new();
    let source_count = sources.len();
    for (index, source) in sources.into_iter().enumerate() {
        let span = tracing::debug_span!("fan_in", source = index);
        tracker.spawn(forward(source, merged.clone(), token.clone()).instrument(span));
    }
    tracker.close();

    let barrier_merged = merged.clone();
    tokio::spawn(async move {
        tracker.wait().await;
        barrier_merged.close();
        debug!(sources = source_count, "fan-in closed");
    });

    merged
}

/// Runs fan-out and fan-in back to back: `replicas` copies of `transform`
/// over `input`, merged into one queue.
pub fn fan_out_in<T, U, F, Fut>(
    input: MessageQueue<T>,
    replicas: usize,
    transform: F,
    token: &CancellationToken,
) -> Result<MessageQueue<Flow<U>>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    let outputs = fan_out(input, replicas, transform, token)?;
    Ok(fan_in(outputs, token))
}

async fn forward<T>(source: MessageQueue<T>, merged: MessageQueue<T>, token: CancellationToken) {
    let mut forwarded = 0_u64;
    loop {
        let item = match source.recv(&token).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "fan-in reader cancelled");
                break;
            }
        };
        if let Err(err) = merged.send(item, &token).await {
            debug!(error = %err.error(), "merged queue rejected item");
            break;
        }
        forwarded += 1;
    }
    debug!(forwarded, "fan-in reader finished");
}
