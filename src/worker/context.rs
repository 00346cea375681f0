//! Per-task execution context.
//!
//! Every dispatched task gets its own [`ExecutionContext`], so concurrently
//! running jobs never share a "current task". The context carries the task's
//! descriptor and handles to the status and artifact stores, and stays open
//! until the worker closes it after the job returns. Callbacks arriving after
//! that fail with [`CallbackError::NoCurrentTask`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{ArtifactError, CallbackError, StoreError};
use crate::report::{ErrorReport, ServerFault};
use crate::store::{ArtifactStore, StatusKey, StatusStore, object_key};
use crate::worker::task::TaskDescriptor;

/// Highest value accepted by [`ExecutionContext::report_progress`].
pub const MAX_PROGRESS: i64 = 99;

/// Status written once a job finished successfully.
pub const COMPLETED_STATUS: &str = "100";

/// Store coordinates shared by every context.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub bucket: String,
    pub index_set: u32,
    pub index_pub: u32,
    pub ttl: Duration,
    pub staging_dir: PathBuf,
}

impl ContextSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bucket: config.artifacts.bucket.clone(),
            index_set: config.redis.index_set,
            index_pub: config.redis.index_pub,
            ttl: config.redis.data_ttl,
            staging_dir: config.artifacts.staging_dir.clone(),
        }
    }
}

/// Shared handles needed to build contexts.
#[derive(Clone)]
pub struct ContextFactory {
    pub status: Arc<dyn StatusStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub settings: Arc<ContextSettings>,
}

impl ContextFactory {
    pub fn new(
        status: Arc<dyn StatusStore>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            status,
            artifacts,
            settings: Arc::new(settings),
        }
    }

    pub fn open(&self, descriptor: Arc<TaskDescriptor>) -> ExecutionContext {
        ExecutionContext {
            inner: Arc::new(ContextInner {
                descriptor,
                status: Arc::clone(&self.status),
                artifacts: Arc::clone(&self.artifacts),
                settings: Arc::clone(&self.settings),
                open: AtomicBool::new(true),
            }),
        }
    }
}

struct ContextInner {
    descriptor: Arc<TaskDescriptor>,
    status: Arc<dyn StatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: Arc<ContextSettings>,
    open: AtomicBool,
}

/// Callback surface bound to exactly one task.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id())
            .field("open", &self.is_open())
            .finish()
    }
}

impl ExecutionContext {
    pub fn task_id(&self) -> &str {
        &self.inner.descriptor.task_id
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.inner.descriptor
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.inner.settings
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Detach the context from its task. Idempotent.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<(), CallbackError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CallbackError::NoCurrentTask {
                task_id: self.task_id().to_string(),
            })
        }
    }

    /// Publish a progress percentage in `0..=99`.
    ///
    /// Writes `<taskId>:status` and announces the task id on the status
    /// channel.
    pub async fn report_progress(&self, percent: i64) -> Result<(), CallbackError> {
        self.ensure_open()?;
        if !(0..=MAX_PROGRESS).contains(&percent) {
            warn!(task_id = %self.task_id(), percent, "Progress out of range");
            return Err(CallbackError::OutOfRange { value: percent });
        }
        self.write_status(&percent.to_string()).await?;
        debug!(task_id = %self.task_id(), percent, "Progress reported");
        Ok(())
    }

    /// Stage `content` under `<staging>/<taskId>/<name>` and upload it to
    /// `<outputDir>/<name>`. The staged copy is removed afterwards.
    pub async fn persist_artifact(&self, name: &str, content: &[u8]) -> Result<(), CallbackError> {
        self.ensure_open()?;

        let staged = self.staging_path(name)?;
        let staging_err = |source: std::io::Error| ArtifactError::Staging {
            path: staged.display().to_string(),
            source,
        };
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(staging_err)?;
        }
        tokio::fs::write(&staged, content)
            .await
            .map_err(staging_err)?;

        let key = object_key(&self.descriptor().output_dir, name);
        let uploaded = self
            .inner
            .artifacts
            .put(&self.settings().bucket, &key, content.to_vec())
            .await;

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "Failed to remove staged artifact");
        }

        match uploaded {
            Ok(()) => {
                debug!(task_id = %self.task_id(), key = %key, "Artifact persisted");
                Ok(())
            }
            Err(e) => {
                let fault = ServerFault::new(e.error_kind(), 1, e.to_string());
                warn!(task_id = %self.task_id(), key = %key, "{}", fault.log_message());
                Err(CallbackError::UploadFailed(e))
            }
        }
    }

    fn staging_path(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        let task_dir = Path::new(self.task_id());
        let relative = Path::new(name);
        let safe = [task_dir, relative].iter().all(|p| {
            p.components().next().is_some()
                && p.components().all(|c| matches!(c, Component::Normal(_)))
        });
        if !safe {
            return Err(ArtifactError::Staging {
                path: format!("{}/{}", self.task_id(), name),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "artifact path must stay inside the task staging directory",
                ),
            });
        }
        Ok(self.settings().staging_dir.join(task_dir).join(relative))
    }

    /// Download `<outputDir>/<name>` from the artifact store.
    pub async fn fetch_artifact(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let key = object_key(&self.descriptor().output_dir, name);
        self.inner
            .artifacts
            .fetch(&self.settings().bucket, &key)
            .await
            .inspect_err(|e| {
                let fault = ServerFault::new(e.error_kind(), 1, e.to_string());
                warn!(task_id = %self.task_id(), key = %key, "{}", fault.log_message());
            })
    }

    /// Final success status: `100` on `<taskId>:status`.
    pub async fn publish_completed(&self) -> Result<(), StoreError> {
        self.write_status(COMPLETED_STATUS).await
    }

    /// Final failure status: the report on `<taskId>:error`.
    pub async fn publish_failure(&self, report: &ErrorReport) -> Result<(), StoreError> {
        self.write(StatusKey::Error, &report.to_json()).await
    }

    async fn write_status(&self, value: &str) -> Result<(), StoreError> {
        self.write(StatusKey::Status, value).await
    }

    async fn write(&self, which: StatusKey, value: &str) -> Result<(), StoreError> {
        let settings = self.settings();
        let key = which.for_task(self.task_id());
        let written = async {
            self.inner
                .status
                .set(settings.index_set, &key, value, settings.ttl)
                .await?;
            self.inner
                .status
                .publish(settings.index_pub, which.channel(), self.task_id())
                .await
        }
        .await;
        written.inspect_err(|e| {
            let fault = ServerFault::new(e.error_kind(), 1, e.to_string());
            warn!(task_id = %self.task_id(), key = %key, "{}", fault.log_message());
        })
    }
}
