//! Error types for the task pipeline engine.
//!
//! Defines [`Error`], the error returned by every engine operation, and
//! [`TaskError`], the opaque failure of a single unit of work. Task failures
//! travel through pools and pipelines as data; only [`ErrorGroup`] turns one
//! into a side effect (cancelling its siblings).
//!
//! [`ErrorGroup`]: crate::group::ErrorGroup

use std::sync::Arc;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A supervised task failed. Returned by [`ErrorGroup::wait`] for the
    /// first failure by completion order.
    ///
    /// [`ErrorGroup::wait`]: crate::group::ErrorGroup::wait
    #[error("task '{task}' failed: {source}")]
    Task {
        /// Identity of the task that reported the failure.
        task: String,
        /// The task's own failure.
        #[source]
        source: TaskError,
    },

    /// The token was cancelled while the caller was blocked.
    #[error("operation cancelled")]
    Cancelled,

    /// The token's deadline passed while the caller was blocked.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A send was attempted on a closed queue.
    #[error("queue is closed")]
    QueueClosed,

    /// A job was submitted after pool shutdown started.
    #[error("worker pool is shut down")]
    PoolShutdown,

    /// Configuration values are out of range (zero workers, zero buffers...).
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` for the cancellation class: explicit cancellation and
    /// deadline expiry are treated identically by the engine.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Returns the error category as a static string.
    ///
    /// Categories: `"task"`, `"cancelled"`, `"closed"`, `"shutdown"`,
    /// `"config"`.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Cancelled | Self::DeadlineExceeded => "cancelled",
            Self::QueueClosed => "closed",
            Self::PoolShutdown => "shutdown",
            Self::InvalidConfig { .. } | Self::ConfigParse { .. } | Self::ConfigIo { .. } => {
                "config"
            }
        }
    }
}

/// Failure of a single unit of work.
///
/// The engine never inspects the failure; it only carries it. Cloning is
/// cheap so the same failure can be recorded by a group and forwarded
/// downstream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    /// The task panicked. Carries the panic payload when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Builds a failure from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns `true` if the task panicked rather than returning an error.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Converts a caught panic payload into a [`TaskError::Panicked`].
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}
