//! Bounded admission gate.
//!
//! Built on [`tokio::sync::Semaphore`]. Acquiring hands out an owned
//! [`Permit`]; the slot returns when the permit is released or dropped, so
//! acquire/release pairing is exact and a double release cannot be written.
//! Wakeup order among blocked acquirers is not part of the contract.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, TryAcquireError};

use crate::error::{Error, Result};
use crate::sync::token::CancellationToken;

/// Counting semaphore limiting concurrently active operations.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
    capacity: usize,
}

/// One slot of a [`Semaphore`], returned on [`release`](Permit::release) or
/// drop.
#[derive(Debug)]
#[must_use = "dropping a permit releases the slot immediately"]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl Permit {
    /// Returns the slot to the semaphore, waking at most one blocked acquirer.
    pub fn release(self) {}
}

impl Semaphore {
    /// Creates a semaphore with `capacity` free slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `capacity` is zero or exceeds
    /// [`tokio::sync::Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_config("semaphore capacity must be at least 1"));
        }
        if capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(Error::invalid_config(format!(
                "semaphore capacity {capacity} exceeds {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            inner: Arc::new(tokio::sync::Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Waits for a free slot.
    ///
    /// If the token fires first, returns the cancellation error and no slot
    /// is consumed. An already-cancelled token fails immediately even when a
    /// slot is free.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<Permit> {
        token.check()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(token.error()),
            permit = self.inner.clone().acquire_owned() => {
                // The inner semaphore is never closed.
                let permit = permit.map_err(|_| Error::Cancelled)?;
                Ok(Permit { _inner: permit })
            }
        }
    }

    /// Takes a free slot without waiting, or returns `None` if none is free.
    pub fn try_acquire(&self) -> Option<Permit> {
        match self.inner.clone().try_acquire_owned() {
            Ok(permit) => Some(Permit { _inner: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Semaphore::new(0).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_try_acquire_exhausts_and_restores() {
        let sem = Semaphore::new(2).unwrap();
        let a = sem.try_acquire().expect("first slot");
        let b = sem.try_acquire().expect("second slot");
        assert!(sem.try_acquire().is_none());
        assert_eq!(sem.available(), 0);

        a.release();
        assert_eq!(sem.available(), 1);
        drop(b);
        assert_eq!(sem.available(), 2);
        assert_eq!(sem.available(), sem.capacity());
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let sem = Semaphore::new(1).unwrap();
        let token = CancellationToken::new();
        let held = sem.acquire(&token).await.unwrap();

        let waiter = {
            let sem = sem.clone();
            let token = token.clone();
            tokio::spawn(async move { sem.acquire(&token).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        held.release();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_acquire_consumes_nothing() {
        let sem = Semaphore::new(1).unwrap();
        let token = CancellationToken::new();
        let _held = sem.acquire(&token).await.unwrap();

        let waiter = {
            let sem = sem.clone();
            let token = token.clone();
            tokio::spawn(async move { sem.acquire(&token).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(sem.available(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_even_with_free_slot() {
        let sem = Semaphore::new(1).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        assert!(sem.acquire(&token).await.is_err());
        assert_eq!(sem.available(), 1);
    }
}
