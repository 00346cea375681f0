//! Per-task worker execution.

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, info, warn};

use crate::report::{ErrorKind, ErrorReport, ServerError, ServerFault};
use crate::worker::context::ExecutionContext;
use crate::worker::registry::TaskRegistry;
use crate::worker::state::TaskStatus;
use crate::worker::task::{Job, JobOutcome};

/// Runs one dispatched task to completion.
///
/// The scheduler has already moved the task to `InProgress`. The worker
/// runs the job once, closes its context and marks the task `Completed`,
/// whatever the job's outcome. The concurrency permit is released last.
pub struct Worker {
    registry: Arc<TaskRegistry>,
    job: Arc<dyn Job>,
    ctx: ExecutionContext,
    permit: OwnedSemaphorePermit,
}

impl Worker {
    pub fn new(
        registry: Arc<TaskRegistry>,
        job: Arc<dyn Job>,
        ctx: ExecutionContext,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            registry,
            job,
            ctx,
            permit,
        }
    }

    pub async fn run(self) {
        let task_id = self.ctx.task_id().to_string();
        info!(task_id = %task_id, kind = self.job.kind(), "Task started");

        // A panicking job must not take the worker with it.
        let job = Arc::clone(&self.job);
        let ctx = self.ctx.clone();
        let outcome = tokio::spawn(async move { job.run(ctx).await }).await;

        match outcome {
            Ok(JobOutcome::Succeeded) => info!(task_id = %task_id, "Task succeeded"),
            Ok(JobOutcome::Failed { errors }) => {
                let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
                warn!(task_id = %task_id, errors = ?codes, "Task failed");
            }
            Err(join_err) => {
                error!(task_id = %task_id, error = %join_err, "Task handler aborted");
                self.report_abort(&join_err.to_string()).await;
            }
        }

        self.ctx.close();
        if let Err(e) = self.registry.set_status(&task_id, TaskStatus::Completed) {
            error!(task_id = %task_id, error = %e, "Failed to complete task");
        }
        drop(self.permit);
    }

    async fn report_abort(&self, reason: &str) {
        let fault = ServerFault::new(ErrorKind::Unexpected, 1, reason);
        error!("{}", fault.log_message());
        let report = ErrorReport::new(
            self.ctx.descriptor().module.clone(),
            vec![ServerError::from(fault)],
        );
        if let Err(e) = self.ctx.publish_failure(&report).await {
            error!(task_id = %self.ctx.task_id(), error = %e, "Failed to publish abort report");
        }
    }
}
