//! TOML-based engine configuration.
//!
//! Every tunable of the engine (pool size, buffer sizes, replica counts,
//! default deadline) is an explicit constructor argument. [`EngineConfig`]
//! bundles them so a caller can keep them in a file.
//!
//! # Example TOML
//!
//! ```toml
//! [pool]
//! workers = 8
//! job_buffer = 32
//! # result_buffer omitted: unbounded
//!
//! [pipeline]
//! stage_buffer = 16
//! replicas = 4
//!
//! [timeouts]
//! deadline_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::CancellationToken;

/// Default number of workers when `[pool]` is omitted.
pub const DEFAULT_WORKERS: usize = 4;

/// Default buffer between pipeline stages.
pub const DEFAULT_STAGE_BUFFER: usize = 16;

/// Default fan-out replica count.
pub const DEFAULT_REPLICAS: usize = 4;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Pipeline and fan-out sizing.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Default deadline applied to the root token.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of worker loops, which is also the concurrency bound.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Job queue capacity. Defaults to `workers` when absent.
    #[serde(default)]
    pub job_buffer: Option<usize>,
    /// Result queue capacity. Unbounded when absent.
    #[serde(default)]
    pub result_buffer: Option<usize>,
}

/// Pipeline stage and fan-out sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Capacity of each queue between stages. Smaller values apply
    /// backpressure sooner.
    #[serde(default = "default_stage_buffer")]
    pub stage_buffer: usize,
    /// Number of replicas used by fan-out topologies.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

/// Deadline settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Deadline for the whole operation tree, in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_stage_buffer() -> usize {
    DEFAULT_STAGE_BUFFER
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl PoolConfig {
    /// Pool of `workers` workers with default buffers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            job_buffer: None,
            result_buffer: None,
        }
    }

    /// Sets the job queue capacity.
    pub fn with_job_buffer(mut self, capacity: usize) -> Self {
        self.job_buffer = Some(capacity);
        self
    }

    /// Sets the result queue capacity. Result consumers must keep up or
    /// workers block while publishing.
    pub fn with_result_buffer(mut self, capacity: usize) -> Self {
        self.result_buffer = Some(capacity);
        self
    }

    /// Effective job queue capacity.
    pub fn job_capacity(&self) -> usize {
        self.job_buffer.unwrap_or(self.workers)
    }

    /// Rejects zero workers and zero-sized buffers.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("pool.workers must be at least 1"));
        }
        if self.job_buffer == Some(0) {
            return Err(Error::invalid_config("pool.job_buffer must be at least 1"));
        }
        if self.result_buffer == Some(0) {
            return Err(Error::invalid_config("pool.result_buffer must be at least 1"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_buffer: DEFAULT_STAGE_BUFFER,
            replicas: DEFAULT_REPLICAS,
        }
    }
}

impl PipelineConfig {
    /// Rejects zero-sized buffers and zero replicas.
    pub fn validate(&self) -> Result<()> {
        if self.stage_buffer == 0 {
            return Err(Error::invalid_config(
                "pipeline.stage_buffer must be at least 1",
            ));
        }
        if self.replicas == 0 {
            return Err(Error::invalid_config("pipeline.replicas must be at least 1"));
        }
        Ok(())
    }
}

impl TimeoutConfig {
    /// The configured deadline as a [`Duration`].
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.pipeline.validate()?;
        if self.timeouts.deadline_ms == Some(0) {
            return Err(Error::invalid_config("timeouts.deadline_ms must be at least 1"));
        }
        Ok(())
    }

    /// A fresh root token carrying the configured deadline, if any.
    pub fn root_token(&self) -> CancellationToken {
        let root = CancellationToken::new();
        match self.timeouts.deadline() {
            Some(deadline) => root.with_timeout(deadline),
            None => root,
        }
    }
}
