//! Integration tests for stages, the pipeline builder and fan-out/fan-in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use taskline::{
    chain, fan_in, fan_out, stage, CancellationToken, MessageQueue, Pipeline, PipelineConfig,
};

async fn source_of(count: u32, token: &CancellationToken) -> MessageQueue<u32> {
    let queue = MessageQueue::unbounded();
    for n in 0..count {
        queue.send(n, token).await.unwrap();
    }
    queue.close();
    queue
}

// ─── Chained stages ─────────────────────────────────────────────────────────

#[tokio::test]
async fn three_stages_produce_one_output_per_input() {
    let token = CancellationToken::new().with_timeout(Duration::from_secs(5));
    let source = source_of(200, &token).await;

    let sink = Pipeline::new(&token)
        .stage(|n: u32| async move { Ok(u64::from(n)) })
        .stage(|n: u64| async move { Ok(n + 1) })
        .stage(|n: u64| async move { Ok(n.to_string()) })
        .build(source);

    let items: Vec<String> = sink
        .collect(&token)
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.unwrap())
        .collect();
    let expected: Vec<String> = (1..=200).map(|n: u32| n.to_string()).collect();
    assert_eq!(items, expected);
}

#[tokio::test]
async fn free_functions_compose_like_the_builder() {
    let token = CancellationToken::new();
    let first = stage(source_of(5, &token).await, |n: u32| async move { Ok(n * 3) }, &token);
    let second = chain(first, |n: u32| async move { Ok(n + 1) }, &token);

    let items: Vec<u32> = second
        .collect(&token)
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.unwrap())
        .collect();
    assert_eq!(items, vec![1, 4, 7, 10, 13]);
}

#[tokio::test]
async fn failure_is_forwarded_with_stage_name() {
    let token = CancellationToken::new();
    let sink = Pipeline::new(&token)
        .named_stage("validate", |n: u32| async move {
            if n % 2 == 1 {
                anyhow::bail!("odd value {n}");
            }
            Ok(n)
        })
        .named_stage("halve", |n: u32| async move { Ok(n / 2) })
        .build(source_of(4, &token).await);

    let items = sink.collect(&token).await.unwrap();
    assert_eq!(items.len(), 4);
    let failures: Vec<_> = items.iter().filter_map(|item| item.as_ref().err()).collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|failure| failure.stage == "validate"));
    assert_eq!(failures[0].to_string(), "stage 'validate' failed: odd value 1");
}

// ─── Backpressure ───────────────────────────────────────────────────────────

#[tokio::test]
async fn bounded_buffers_throttle_upstream() {
    let token = CancellationToken::new();
    let config = PipelineConfig {
        stage_buffer: 2,
        replicas: 1,
    };
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&pulled);

    let sink = Pipeline::with_config(&token, &config)
        .unwrap()
        .stage(move |n: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .build(source_of(100, &token).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Buffer of 2 plus the item blocked in send.
    assert!(pulled.load(Ordering::SeqCst) <= 3);

    let drained = sink.collect(&token).await.unwrap();
    assert_eq!(drained.len(), 100);
    assert_eq!(pulled.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn cancellation_closes_every_stage() {
    let token = CancellationToken::new();
    let source = MessageQueue::<u32>::unbounded();
    let sink = Pipeline::new(&token)
        .stage(|n: u32| async move { Ok(n) })
        .stage(|n: u32| async move { Ok(n) })
        .build(source.clone());

    source.send(1, &token).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let reader = CancellationToken::new();
    let items = tokio::time::timeout(Duration::from_secs(1), sink.collect(&reader))
        .await
        .expect("sink must close after cancellation")
        .unwrap();
    assert!(items.len() <= 1);
    assert!(sink.is_closed());
}

// ─── Fan-out / fan-in ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_in_conserves_counts() {
    const REPLICAS: usize = 4;
    const PER_REPLICA: u32 = 25;
    let token = CancellationToken::new();
    let source = MessageQueue::unbounded();
    for n in 0..(REPLICAS as u32 * PER_REPLICA) {
        source.send(n % 10, &token).await.unwrap();
    }
    source.close();

    let outputs = fan_out(source, REPLICAS, |n: u32| async move { Ok(n) }, &token).unwrap();
    assert_eq!(outputs.len(), REPLICAS);
    let merged = fan_in(outputs, &token);

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for item in merged.collect(&token).await.unwrap() {
        *counts.entry(item.unwrap()).or_default() += 1;
    }
    assert_eq!(counts.values().sum::<usize>(), 100);
    assert!(counts.values().all(|count| *count == 10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicas_tag_their_failures() {
    let token = CancellationToken::new();
    let outputs = fan_out(
        source_of(8, &token).await,
        2,
        |_n: u32| async move { Err::<u32, _>(anyhow::anyhow!("unavailable")) },
        &token,
    )
    .unwrap();
    let merged = fan_in(outputs, &token);

    let items = merged.collect(&token).await.unwrap();
    assert_eq!(items.len(), 8);
    assert!(items
        .iter()
        .all(|item| item.as_ref().unwrap_err().stage.starts_with("replica-")));
}
