//! The air-routing algorithm job.
//!
//! Pipeline per task:
//! 1. fetch `<s3Dir>/input`
//! 2. run the kernel on a blocking thread, with progress/save callbacks bound
//!    to this task
//! 3. parse the kernel output; reported errors fail the task
//! 4. persist `<s3Dir>/output` as `{"module", "errors", "data"}`
//! 5. publish `100` on `<taskId>:status`, or the error report on `<taskId>:error`
//!
//! Every failure is captured into the output document and the error report.
//! Nothing escapes to the worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{error, info};

use crate::jobs::kernel::{Kernel, KernelCallbacks};
use crate::report::{ErrorKind, ErrorReport, ModuleStamp, ServerError, ServerFault};
use crate::worker::{ExecutionContext, Job, JobOutcome};

pub const INPUT_OBJECT: &str = "input";
pub const OUTPUT_OBJECT: &str = "output";

/// Document produced by the kernel and stored as the task output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleStamp>,
    #[serde(default)]
    pub errors: Vec<ServerError>,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub struct AlgorithmJob {
    kernel: Arc<dyn Kernel>,
}

impl AlgorithmJob {
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self { kernel }
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        output: &mut AlgorithmOutput,
    ) -> Result<(), ServerFault> {
        let input = ctx
            .fetch_artifact(INPUT_OBJECT)
            .await
            .map_err(|e| ServerFault::new(ErrorKind::GetInputData, 1, e.to_string()))?;

        let kernel = Arc::clone(&self.kernel);
        let callbacks = KernelCallbacks::bind(ctx.clone(), Handle::current());
        info!(task_id = %ctx.task_id(), kernel = kernel.name(), "Running kernel");

        let raw = tokio::task::spawn_blocking(move || kernel.execute(input, &callbacks))
            .await
            .map_err(|e| ServerFault::new(ErrorKind::Unexpected, 1, e.to_string()))?
            .map_err(|e| ServerFault::new(ErrorKind::Execute, 1, e.to_string()))?;

        *output = serde_json::from_slice(&raw).map_err(|e| {
            ServerFault::new(ErrorKind::ParseOutput, 1, format!("Failed to parse output: {e}"))
        })?;

        if !output.errors.is_empty() {
            return Err(ServerFault::new(
                ErrorKind::Execute,
                1,
                format!("Failed to {}", self.kernel.name()),
            ));
        }
        Ok(())
    }

    async fn store_output(&self, ctx: &ExecutionContext, output: &AlgorithmOutput) {
        let body = match serde_json::to_vec(output) {
            Ok(body) => body,
            Err(e) => {
                let fault = ServerFault::new(ErrorKind::SerializeOutput, 1, e.to_string());
                error!(task_id = %ctx.task_id(), "{}", fault.log_message());
                return;
            }
        };
        if let Err(e) = ctx.persist_artifact(OUTPUT_OBJECT, &body).await {
            let fault = ServerFault::new(ErrorKind::PutOutputData, 1, e.to_string());
            error!(task_id = %ctx.task_id(), "{}", fault.log_message());
        }
    }

    async fn publish_result(&self, ctx: &ExecutionContext, errors: &[ServerError]) {
        let published = if errors.is_empty() {
            ctx.publish_completed().await
        } else {
            let report = ErrorReport::new(ctx.descriptor().module.clone(), errors.to_vec());
            ctx.publish_failure(&report).await
        };
        if let Err(e) = published {
            let fault = ServerFault::new(e.error_kind(), 1, e.to_string());
            error!(task_id = %ctx.task_id(), "{}", fault.log_message());
        }
    }
}

#[async_trait]
impl Job for AlgorithmJob {
    fn kind(&self) -> &str {
        "air_algorithm"
    }

    async fn run(&self, ctx: ExecutionContext) -> JobOutcome {
        info!(task_id = %ctx.task_id(), s3_dir = %ctx.descriptor().output_dir, "Executing");

        let mut output = AlgorithmOutput::default();
        if let Err(fault) = self.execute(&ctx, &mut output).await {
            error!(task_id = %ctx.task_id(), "{}", fault.log_message());
            output.errors.push(ServerError::from(fault));
        }
        output.module = Some(ctx.descriptor().module.clone());

        self.store_output(&ctx, &output).await;
        self.publish_result(&ctx, &output.errors).await;

        info!(task_id = %ctx.task_id(), "Completed");
        if output.errors.is_empty() {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed {
                errors: output.errors,
            }
        }
    }
}
