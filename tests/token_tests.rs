//! Integration tests for the hierarchical cancellation token.

use std::time::Duration;

use pretty_assertions::assert_eq;
use taskline::{CancelReason, CancellationToken, Error, MessageQueue, Semaphore};
use tokio::time::Instant;

// ─── Propagation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_reaches_every_descendant() {
    let root = CancellationToken::new();
    let child = root.child();
    let grandchild = child.with_timeout(Duration::from_secs(60));

    root.cancel();

    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
    assert_eq!(grandchild.reason(), Some(CancelReason::Cancelled));
}

#[tokio::test]
async fn cancelling_child_leaves_parent_and_siblings() {
    let root = CancellationToken::new();
    let left = root.child();
    let right = root.child();

    left.cancel();

    assert!(left.is_cancelled());
    assert!(!right.is_cancelled());
    assert!(!root.is_cancelled());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let token = CancellationToken::new();
    token.cancel();
    token.cancel();
    assert!(matches!(token.check(), Err(Error::Cancelled)));
}

// ─── Deadlines ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn child_inherits_earlier_deadline() {
    let root = CancellationToken::new().with_timeout(Duration::from_millis(50));
    let relaxed = root.with_timeout(Duration::from_secs(60));

    assert_eq!(relaxed.deadline(), root.deadline());
    assert!(relaxed.remaining().unwrap() <= Duration::from_millis(50));
}

#[tokio::test]
async fn child_can_tighten_deadline() {
    let root = CancellationToken::new().with_timeout(Duration::from_secs(60));
    let tight = root.with_deadline(Instant::now() + Duration::from_millis(10));
    assert!(tight.deadline().unwrap() < root.deadline().unwrap());
}

#[tokio::test]
async fn deadline_fires_cancelled_future() {
    let token = CancellationToken::new().with_timeout(Duration::from_millis(20));
    let started = Instant::now();

    tokio::time::timeout(Duration::from_secs(1), token.cancelled())
        .await
        .expect("deadline should wake the waiter");

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    assert!(matches!(token.check(), Err(Error::DeadlineExceeded)));
}

#[tokio::test]
async fn expired_deadline_is_seen_by_children() {
    let parent = CancellationToken::new().with_timeout(Duration::from_millis(5));
    let child = parent.child();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(child.is_cancelled());
    assert!(parent.is_cancelled());
}

// ─── run_until_cancelled ────────────────────────────────────────────────────

#[tokio::test]
async fn run_until_cancelled_returns_output() {
    let token = CancellationToken::new();
    let value = token.run_until_cancelled(async { 7 }).await.unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn run_until_cancelled_stops_slow_future() {
    let token = CancellationToken::new().with_timeout(Duration::from_millis(10));
    let err = token
        .run_until_cancelled(tokio::time::sleep(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(err.category(), "cancelled");
}

// ─── Blocked waiters ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_unblocks_every_blocked_receiver_and_acquirer() {
    const WAITERS: usize = 8;
    let token = CancellationToken::new();
    let queue = MessageQueue::<u32>::unbounded();
    let semaphore = Semaphore::new(1).unwrap();
    let _held = semaphore.try_acquire().unwrap();

    let mut waiters = Vec::new();
    for _ in 0..WAITERS {
        let queue = queue.clone();
        let recv_token = token.clone();
        waiters.push(tokio::spawn(async move { queue.recv(&recv_token).await.map(|_| ()) }));

        let semaphore = semaphore.clone();
        let token = token.child();
        waiters.push(tokio::spawn(async move {
            semaphore.acquire(&token).await.map(|_permit| ())
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    token.cancel();
    for waiter in waiters {
        let outcome = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter must return promptly after cancel")
            .unwrap();
        assert!(outcome.unwrap_err().is_cancellation());
    }
    assert_eq!(semaphore.available(), 0);
}
