//! Typed pipeline builder.
//!
//! Stages are recorded when added and started only by `build`, so building
//! must happen inside a tokio runtime but declaring a pipeline does not.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::fan::fan_in_with_buffer;
use crate::pipeline::stage::{spawn_chained_stage, spawn_source_stage, Flow};
use crate::sync::{CancellationToken, MessageQueue};

type Connect<In, Out> = Box<dyn FnOnce(MessageQueue<In>) -> MessageQueue<Flow<Out>> + Send>;

/// An empty pipeline accepting `T`. Adding the first stage turns it into a
/// [`PipelineBuilder`].
///
/// # Examples
///
/// ```
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # rt.block_on(async {
/// use taskline::{CancellationToken, MessageQueue, Pipeline};
///
/// let token = CancellationToken::new();
/// let source = MessageQueue::unbounded();
/// for line in ["1", "2", "x"] {
///     source.send(line.to_string(), &token).await.unwrap();
/// }
/// source.close();
///
/// let sink = Pipeline::new(&token)
///     .named_stage("parse", |line: String| async move {
///         Ok::<_, anyhow::Error>(line.parse::<u32>()?)
///     })
///     .named_stage("double", |n: u32| async move { Ok(n * 2) })
///     .build(source);
///
/// let items = sink.collect(&token).await.unwrap();
/// assert_eq!(*items[1].as_ref().unwrap(), 4);
/// assert_eq!(items[2].as_ref().unwrap_err().stage, "parse");
/// # });
/// ```
pub struct Pipeline<T> {
    token: CancellationToken,
    config: PipelineConfig,
    _input: PhantomData<fn(T)>,
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Empty pipeline with default buffers running under `token`.
    pub fn new(token: &CancellationToken) -> Self {
        Self {
            token: token.clone(),
            config: PipelineConfig::default(),
            _input: PhantomData,
        }
    }

    /// Empty pipeline sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) when a
    /// buffer or replica count is zero.
    pub fn with_config(token: &CancellationToken, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            token: token.clone(),
            config: config.clone(),
            _input: PhantomData,
        })
    }

    /// Adds the first stage, named `stage-0`.
    pub fn stage<U, F, Fut>(self, transform: F) -> PipelineBuilder<T, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.named_stage("stage-0", transform)
    }

    /// Adds the first stage under `name`.
    pub fn named_stage<U, F, Fut>(self, name: impl Into<String>, transform: F) -> PipelineBuilder<T, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let transform = Arc::new(transform);
        let token = self.token.clone();
        let buffer = self.config.stage_buffer;

        let connect: Connect<T, U> = Box::new(move |source| {
            let output = MessageQueue::with_capacity(Some(buffer));
            spawn_source_stage(name, source, output.clone(), token, transform);
            output
        });

        PipelineBuilder {
            token: self.token,
            config: self.config,
            stages: 1,
            connect,
        }
    }

    /// Builds a pipeline with no stages: every source item comes out
    /// wrapped in `Ok`, and the sink closes when the source does.
    pub fn build(self, source: MessageQueue<T>) -> MessageQueue<Flow<T>> {
        let output = MessageQueue::with_capacity(Some(self.config.stage_buffer));
        spawn_source_stage(
            Arc::from("identity"),
            source,
            output.clone(),
            self.token,
            Arc::new(|item: T| async move { Ok::<_, anyhow::Error>(item) }),
        );
        output
    }
}

/// A pipeline with at least one stage, from `In` items to `Flow<Out>` items.
pub struct PipelineBuilder<In, Out> {
    token: CancellationToken,
    config: PipelineConfig,
    stages: usize,
    connect: Connect<In, Out>,
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a stage named `stage-<index>`.
    pub fn stage<U, F, Fut>(self, transform: F) -> PipelineBuilder<In, U>
    where
        U: Send + 'static,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let name = format!("stage-{}", self.stages);
        self.named_stage(name, transform)
    }

    /// Appends a stage under `name`. Failures from earlier stages pass
    /// through it untouched.
    pub fn named_stage<U, F, Fut>(self, name: impl Into<String>, transform: F) -> PipelineBuilder<In, U>
    where
        U: Send + 'static,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let transform = Arc::new(transform);
        let token = self.token.clone();
        let buffer = self.config.stage_buffer;
        let upstream = self.connect;

        let connect: Connect<In, U> = Box::new(move |source| {
            let input = upstream(source);
            let output = MessageQueue::with_capacity(Some(buffer));
            spawn_chained_stage(name, input, output.clone(), token, transform);
            output
        });

        PipelineBuilder {
            token: self.token,
            config: self.config,
            stages: self.stages + 1,
            connect,
        }
    }

    /// Appends a stage replicated `replicas` times (from the pipeline
    /// config) over the previous stage's output and merged back into one
    /// queue. Output order after this stage is unspecified.
    pub fn replicated_stage<U, F, Fut>(self, transform: F) -> PipelineBuilder<In, U>
    where
        U: Send + 'static,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let base = format!("stage-{}", self.stages);
        let transform = Arc::new(transform);
        let token = self.token.clone();
        let buffer = self.config.stage_buffer;
        let replicas = self.config.replicas;
        let upstream = self.connect;

        let connect: Connect<In, U> = Box::new(move |source| {
            let input = upstream(source);
            let outputs = (0..replicas)
                .map(|replica| {
                    let output = MessageQueue::with_capacity(Some(buffer));
                    spawn_chained_stage(
                        Arc::from(format!("{base}-replica-{replica}")),
                        input.clone(),
                        output.clone(),
                        token.clone(),
                        Arc::clone(&transform),
                    );
                    output
                })
                .collect();
            fan_in_with_buffer(outputs, &token, buffer)
        });

        PipelineBuilder {
            token: self.token,
            config: self.config,
            stages: self.stages + 1,
            connect,
        }
    }

    /// Number of stages added so far.
    pub fn stage_count(&self) -> usize {
        self.stages
    }

    /// Starts every stage and returns the sink queue. The sink closes once
    /// the source is closed and drained through every stage, or once the
    /// token fires.
    pub fn build(self, source: MessageQueue<In>) -> MessageQueue<Flow<Out>> {
        debug!(stages = self.stages, "starting pipeline");
        (self.connect)(source)
    }
}
