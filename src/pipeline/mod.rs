//! Multi-stage pipelines.
//!
//! A stage is a spawned task between two [`MessageQueue`](crate::MessageQueue)s.
//! Stages compose by handing one stage's output queue to the next, either
//! directly with [`stage`] and [`chain`] or through the typed
//! [`Pipeline`] builder. [`fan_out`] and [`fan_in`] replicate a stage and
//! merge the replicas back together.

mod builder;
mod fan;
mod stage;

pub use builder::{Pipeline, PipelineBuilder};
pub use fan::{fan_in, fan_out, fan_out_in};
pub use stage::{chain, named_chain, named_stage, stage, Flow, StageError};
