//! Scheduler loop: dispatch standby tasks, reap completed ones.
//!
//! One scan per tick, under the registry lock:
//! - `Standby`: if a concurrency permit is free, move the task to
//!   `InProgress` and spawn its worker; otherwise leave it for a later tick.
//! - `InProgress`: skip.
//! - `Completed`: remove.
//!
//! Records are visited in admission order, so standby tasks start FIFO.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::AdmissionError;
use crate::worker::admission::AdmissionController;
use crate::worker::context::ContextFactory;
use crate::worker::registry::{RegistrySummary, TaskRegistry};
use crate::worker::state::TaskStatus;
use crate::worker::task::{Job, TaskDescriptor, TaskRecord};
use crate::worker::worker::Worker;

/// What one scan did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub reaped: usize,
    /// Standby tasks left waiting for a permit.
    pub deferred: usize,
}

/// Admits submissions and drives admitted tasks through their lifecycle.
pub struct Scheduler {
    admission: AdmissionController,
    contexts: ContextFactory,
    permits: Arc<Semaphore>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        admission: AdmissionController,
        contexts: ContextFactory,
        tick: Duration,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            admission,
            contexts,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            tick,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.admission.registry()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Permits currently free for new workers.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn summary(&self) -> RegistrySummary {
        self.registry().summary()
    }

    /// Offer a new task for admission. On success it waits in `Standby`
    /// until the next scan.
    pub fn submit(
        &self,
        descriptor: TaskDescriptor,
        job: Arc<dyn Job>,
        memory_estimate: i64,
    ) -> Result<(), AdmissionError> {
        let record = TaskRecord::new(descriptor, job).with_memory_estimate(memory_estimate);
        self.admission.admit(record)
    }

    /// Run a single scan. Must be called from within a tokio runtime.
    pub fn tick_once(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut table = self.registry().lock();

        let visit: Vec<_> = table
            .records()
            .into_iter()
            .map(|r| {
                (
                    r.id().to_string(),
                    r.status,
                    Arc::clone(&r.descriptor),
                    Arc::clone(&r.job),
                )
            })
            .collect();

        for (task_id, status, descriptor, job) in visit {
            match status {
                TaskStatus::Standby => {
                    let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                        report.deferred += 1;
                        continue;
                    };
                    if let Err(e) = table.set_status(&task_id, TaskStatus::InProgress) {
                        error!(task_id = %task_id, error = %e, "Failed to start task");
                        continue;
                    }
                    let ctx = self.contexts.open(descriptor);
                    let worker = Worker::new(Arc::clone(self.registry()), job, ctx, permit);
                    tokio::spawn(worker.run());
                    report.dispatched += 1;
                }
                TaskStatus::InProgress => {}
                TaskStatus::Completed => match table.remove(&task_id) {
                    Ok(_) => {
                        debug!(task_id = %task_id, "Task removed");
                        report.reaped += 1;
                    }
                    Err(e) => error!(task_id = %task_id, error = %e, "Failed to remove task"),
                },
            }
        }

        report
    }

    /// Spawn the scheduler loop. It runs for the lifetime of the process.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Scheduler loop started (interval: {}ms, workers: {})",
                self.tick.as_millis(),
                self.permits.available_permits()
            );

            let mut tick = tokio::time::interval(self.tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tick.tick().await;
                let report = self.tick_once();
                if report != TickReport::default() {
                    debug!(
                        dispatched = report.dispatched,
                        reaped = report.reaped,
                        deferred = report.deferred,
                        "Scheduler tick"
                    );
                }
            }
        })
    }
}
