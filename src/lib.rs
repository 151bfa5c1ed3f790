//! Concurrent task pipeline engine.
//!
//! `taskline` is a small coordination layer for running many independent
//! units of work under bounded parallelism, chaining them into pipelines,
//! and supervising them as a group that fails together.
//!
//! # Overview
//!
//! A caller creates a [`CancellationToken`] (optionally with a deadline) and
//! hands it to whatever topology it builds:
//!
//! - a [`WorkerPool`] for independent jobs,
//! - a [`Pipeline`] of ordered stages, or [`fan_out`]/[`fan_in`] for
//!   replicated stages merged back into one queue,
//! - an [`ErrorGroup`] supervising any of the above.
//!
//! Task failures are data: pools publish them as [`JobResult`]s and stages
//! forward them as [`StageError`] items. Only an [`ErrorGroup`] reacts to a
//! failure, by cancelling its token.
//!
//! # Module Organization
//!
//! - [`sync`] - Cancellation token, semaphore and closable message queue
//! - [`pool`] - Fixed-size worker pool with per-job results
//! - [`pipeline`] - Stages, pipeline builder, fan-out and fan-in
//! - [`group`] - Error group with first-failure capture
//! - [`config`] - TOML engine configuration
//! - [`error`] - Engine and task error types

pub mod config;
pub mod error;
pub mod group;
#[cfg(feature = "logging")]
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod sync;
pub mod task;

// Re-exports for ergonomic access
pub use config::{EngineConfig, PipelineConfig, PoolConfig, TimeoutConfig};
pub use error::{Error, Result, TaskError};
pub use group::{ErrorGroup, ErrorRecord};
pub use pipeline::{
    chain, fan_in, fan_out, fan_out_in, named_chain, named_stage, stage, Flow, Pipeline,
    PipelineBuilder, StageError,
};
pub use pool::{JobResult, PoolStats, WorkerPool, WorkerState};
pub use sync::{
    CancelReason, CancellationToken, MessageQueue, Permit, Semaphore, SendError, TryRecvError,
    TrySendError,
};
pub use task::TaskFuture;
