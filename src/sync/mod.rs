//! Coordination primitives shared by every engine component.
//!
//! - [`token`] - Hierarchical cancellation with inherited deadlines
//! - [`semaphore`] - Bounded admission gate with RAII permits
//! - [`queue`] - Closable MPMC queue with blocking and non-blocking ends
//!
//! These are the only places where concurrently running tasks share mutable
//! state; each primitive synchronizes itself.

pub mod queue;
pub mod semaphore;
pub mod token;

pub use queue::{MessageQueue, SendError, TryRecvError, TrySendError};
pub use semaphore::{Permit, Semaphore};
pub use token::{CancelReason, CancellationToken};
