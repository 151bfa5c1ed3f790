//! Closable multi-producer, multi-consumer queue.
//!
//! [`MessageQueue`] is the only conduit for shared state between concurrent
//! tasks. Every clone is a handle to the same queue and can both send and
//! receive. Items are delivered in send order, and when several consumers
//! share one queue each item goes to exactly one of them.
//!
//! Closing is explicit and idempotent. After [`close`](MessageQueue::close)
//! every send fails fast, buffered items stay receivable, and a receive on a
//! closed, drained queue returns `Ok(None)`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::sync::token::CancellationToken;

/// Returned by [`MessageQueue::send`] when the item could not be enqueued.
/// The rejected item is handed back.
pub struct SendError<T> {
    item: T,
    error: Error,
}

impl<T> SendError<T> {
    /// Recovers the item that was not sent.
    pub fn into_inner(self) -> T {
        self.item
    }

    /// Why the send failed: [`Error::QueueClosed`] or a cancellation error.
    pub fn error(&self) -> &Error {
        &self.error
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.error)
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        err.error
    }
}

/// Returned by [`MessageQueue::try_send`].
pub enum TrySendError<T> {
    /// The bounded queue is at capacity.
    Full(T),
    /// The queue is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recovers the item that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Returned by [`MessageQueue::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// Nothing buffered right now, but the queue is still open.
    #[error("queue is empty")]
    Empty,
    /// The queue is closed and drained.
    #[error("queue is closed")]
    Closed,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: Option<usize>,
    item_ready: Notify,
    space_ready: Notify,
}

/// Ordered, optionally bounded, closable queue.
///
/// # Examples
///
/// ```
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// use taskline::{CancellationToken, MessageQueue};
///
/// let token = CancellationToken::new();
/// let queue = MessageQueue::bounded(2).unwrap();
///
/// queue.send(1, &token).await.unwrap();
/// queue.send(2, &token).await.unwrap();
/// queue.close();
///
/// assert!(queue.send(3, &token).await.is_err());
/// assert_eq!(queue.recv(&token).await.unwrap(), Some(1));
/// assert_eq!(queue.recv(&token).await.unwrap(), Some(2));
/// assert_eq!(queue.recv(&token).await.unwrap(), None);
/// # });
/// ```
pub struct MessageQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MessageQueue")
            .field("len", &state.buffer.len())
            .field("capacity", &self.shared.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> MessageQueue<T> {
    /// Creates a queue holding at most `capacity` items. Senders wait while
    /// it is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_config("queue capacity must be at least 1"));
        }
        Ok(Self::with_capacity(Some(capacity)))
    }

    /// Creates a queue whose sends never wait.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a bounded queue for `Some(n)`, unbounded for `None`.
    pub(crate) fn with_capacity(capacity: Option<usize>) -> Self {
        let buffer = match capacity {
            Some(n) => VecDeque::with_capacity(n),
            None => VecDeque::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer,
                    closed: false,
                }),
                capacity,
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    /// Enqueues `item`, waiting for space if the queue is bounded and full.
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed, or with a
    /// cancellation error if the token fires first (including when it had
    /// already fired before the call). The item is returned inside the error.
    pub async fn send(&self, item: T, token: &CancellationToken) -> Result<(), SendError<T>> {
        let mut item = item;
        loop {
            let notified = self.shared.space_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if token.is_cancelled() {
                return Err(SendError {
                    item,
                    error: token.error(),
                });
            }
            match self.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(rejected)) => {
                    return Err(SendError {
                        item: rejected,
                        error: Error::QueueClosed,
                    });
                }
                Err(TrySendError::Full(rejected)) => item = rejected,
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // Hand a wakeup this waiter may have absorbed to the next one.
                    self.shared.space_ready.notify_one();
                    return Err(SendError {
                        item,
                        error: token.error(),
                    });
                }
                _ = &mut notified => {}
            }
        }
    }

    /// Enqueues `item` without waiting.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(TrySendError::Closed(item));
            }
            if let Some(capacity) = self.shared.capacity {
                if state.buffer.len() >= capacity {
                    return Err(TrySendError::Full(item));
                }
            }
            state.buffer.push_back(item);
        }
        self.shared.item_ready.notify_one();
        Ok(())
    }

    /// Waits for the next item.
    ///
    /// Returns `Ok(Some(item))`, `Ok(None)` once the queue is closed and
    /// drained, or a cancellation error if the token fires first.
    pub async fn recv(&self, token: &CancellationToken) -> Result<Option<T>> {
        loop {
            let notified = self.shared.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            token.check()?;
            match self.try_recv() {
                Ok(item) => return Ok(Some(item)),
                Err(TryRecvError::Closed) => return Ok(None),
                Err(TryRecvError::Empty) => {}
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.shared.item_ready.notify_one();
                    return Err(token.error());
                }
                _ = &mut notified => {}
            }
        }
    }

    /// Takes the next item without waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let (item, more) = {
            let mut state = self.shared.state.lock();
            match state.buffer.pop_front() {
                Some(item) => (item, !state.buffer.is_empty()),
                None if state.closed => return Err(TryRecvError::Closed),
                None => return Err(TryRecvError::Empty),
            }
        };
        if self.shared.capacity.is_some() {
            self.shared.space_ready.notify_one();
        }
        if more {
            self.shared.item_ready.notify_one();
        }
        Ok(item)
    }

    /// Receives until the queue is closed and drained.
    pub async fn collect(&self, token: &CancellationToken) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.recv(token).await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Closes the queue. Idempotent; wakes every blocked sender and receiver.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.item_ready.notify_waiters();
        self.shared.space_ready.notify_waiters();
    }

    /// Returns `true` once [`close`](MessageQueue::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered items, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }
}
