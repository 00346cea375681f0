//! Task records and the job capability stored on them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::report::{ModuleStamp, ServerError};
use crate::worker::context::ExecutionContext;
use crate::worker::state::TaskStatus;

/// Immutable job metadata shared by the job and by status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor {
    /// Caller-supplied identifier, unique among live tasks.
    pub task_id: String,
    /// Module/operator identity stamped on every status payload.
    pub module: ModuleStamp,
    /// Artifact-store directory holding this task's input and output.
    pub output_dir: String,
    /// Job-specific request data.
    pub payload: serde_json::Value,
}

impl TaskDescriptor {
    pub fn new(
        task_id: impl Into<String>,
        module: ModuleStamp,
        output_dir: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            module,
            output_dir: output_dir.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// What a job reports back to its worker. Used for logging only; the
/// scheduler completes the task either way.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed { errors: Vec<ServerError> },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A pluggable job type.
///
/// `run` is invoked exactly once per admitted task. It must turn every
/// internal failure into its own status/error report; anything it does not
/// handle is only logged by the worker.
#[async_trait]
pub trait Job: Send + Sync {
    /// Short name of the job type, for logs.
    fn kind(&self) -> &str;

    async fn run(&self, ctx: ExecutionContext) -> JobOutcome;
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("kind", &self.kind()).finish()
    }
}

type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;

/// Job built from a closure.
pub struct ClosureJob {
    kind: String,
    f: Box<dyn Fn(ExecutionContext) -> JobFuture + Send + Sync>,
}

impl ClosureJob {
    pub fn new<F, Fut>(kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Self {
            kind: kind.into(),
            f: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

#[async_trait]
impl Job for ClosureJob {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn run(&self, ctx: ExecutionContext) -> JobOutcome {
        (self.f)(ctx).await
    }
}

/// A task as held by the registry.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub descriptor: Arc<TaskDescriptor>,
    pub job: Arc<dyn Job>,
    /// Declared peak additional memory in bytes; 0 when unknown.
    pub memory_estimate: i64,
    pub status: TaskStatus,
    pub admitted_at: DateTime<Utc>,
    /// Admission order, assigned by the registry.
    pub(crate) sequence: u64,
}

impl TaskRecord {
    pub fn new(descriptor: TaskDescriptor, job: Arc<dyn Job>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            job,
            memory_estimate: 0,
            status: TaskStatus::Standby,
            admitted_at: Utc::now(),
            sequence: 0,
        }
    }

    pub fn with_memory_estimate(mut self, bytes: i64) -> Self {
        self.memory_estimate = bytes;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.task_id
    }
}
