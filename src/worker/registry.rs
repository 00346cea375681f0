//! Task registry — the single source of truth for live tasks.
//!
//! One `parking_lot` mutex guards the whole table: membership, status, the
//! per-task memory estimates and the admission baseline. Every critical
//! section is short and never spans I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::error::{AdmissionError, RegistryError};
use crate::worker::state::TaskStatus;
use crate::worker::task::{TaskDescriptor, TaskRecord};

/// Point-in-time copy of one registered task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub memory_estimate: i64,
    pub descriptor: Arc<TaskDescriptor>,
}

/// One registered task as reported by `/tasks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub task_id: String,
    pub kind: String,
    pub status: TaskStatus,
    pub memory_estimate: i64,
    pub admitted_at: DateTime<Utc>,
    /// The submitted request body.
    pub request: serde_json::Value,
}

/// Counts of registered tasks per status, plus the tasks in admission order.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySummary {
    pub total: usize,
    pub standby: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// Sum of memory estimates over all registered tasks.
    pub memory_estimate: i64,
    pub tasks: Vec<TaskEntry>,
}

/// The lock-protected contents of the registry.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: HashMap<String, TaskRecord>,
    next_sequence: u64,
    /// Host memory in use outside any tracked task, sampled when the table
    /// was last empty at admission time.
    baseline_used_memory: i64,
}

impl TaskTable {
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    /// Store `record` unless its id is already present. Never overwrites.
    pub fn try_insert(&mut self, mut record: TaskRecord) -> Result<(), AdmissionError> {
        if self.tasks.contains_key(record.id()) {
            return Err(AdmissionError::DuplicateTask {
                task_id: record.id().to_string(),
            });
        }
        record.status = TaskStatus::Standby;
        record.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.tasks.insert(record.id().to_string(), record);
        Ok(())
    }

    /// Sum of `memory_estimate` over every registered record.
    pub fn total_memory_estimate(&self) -> i64 {
        self.tasks.values().map(|r| r.memory_estimate).sum()
    }

    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) -> Result<(), RegistryError> {
        let record = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound {
                task_id: task_id.to_string(),
            })?;
        if !record.status.can_transition_to(status) {
            return Err(RegistryError::InvalidTransition {
                task_id: task_id.to_string(),
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }
        record.status = status;
        Ok(())
    }

    /// Delete a record. Only completed records may be removed.
    pub fn remove(&mut self, task_id: &str) -> Result<TaskRecord, RegistryError> {
        let status = self
            .tasks
            .get(task_id)
            .map(|r| r.status)
            .ok_or_else(|| RegistryError::NotFound {
                task_id: task_id.to_string(),
            })?;
        if !status.is_reapable() {
            return Err(RegistryError::InvalidTransition {
                task_id: task_id.to_string(),
                from: status.to_string(),
                to: "removed".to_string(),
            });
        }
        self.tasks
            .remove(task_id)
            .ok_or_else(|| RegistryError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Records in admission order.
    pub fn records(&self) -> Vec<&TaskRecord> {
        let mut records: Vec<&TaskRecord> = self.tasks.values().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.records()
            .into_iter()
            .map(|r| TaskSnapshot {
                task_id: r.id().to_string(),
                status: r.status,
                memory_estimate: r.memory_estimate,
                descriptor: Arc::clone(&r.descriptor),
            })
            .collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary {
            total: self.tasks.len(),
            memory_estimate: self.total_memory_estimate(),
            ..Default::default()
        };
        for record in self.records() {
            match record.status {
                TaskStatus::Standby => summary.standby += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
            }
            summary.tasks.push(TaskEntry {
                task_id: record.id().to_string(),
                kind: record.job.kind().to_string(),
                status: record.status,
                memory_estimate: record.memory_estimate,
                admitted_at: record.admitted_at,
                request: record.descriptor.payload.clone(),
            });
        }
        summary
    }

    pub fn baseline_used_memory(&self) -> i64 {
        self.baseline_used_memory
    }

    pub(crate) fn set_baseline_used_memory(&mut self, bytes: i64) {
        self.baseline_used_memory = bytes;
    }
}

/// Mutex-guarded map from task id to [`TaskRecord`].
#[derive(Debug, Default)]
pub struct TaskRegistry {
    table: Mutex<TaskTable>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the registry lock. Keep the guard for one critical section only.
    pub fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock()
    }

    pub fn try_insert(&self, record: TaskRecord) -> Result<(), AdmissionError> {
        self.lock().try_insert(record)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains(task_id)
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.lock().get(task_id).map(|r| r.status)
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), RegistryError> {
        self.lock().set_status(task_id, status)
    }

    pub fn remove(&self, task_id: &str) -> Result<TaskRecord, RegistryError> {
        self.lock().remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Consistent view taken under the registry lock.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.lock().snapshot()
    }

    /// Snapshot without blocking indefinitely; `None` when the lock could
    /// not be taken within `wait`.
    pub fn try_snapshot(&self, wait: Duration) -> Option<Vec<TaskSnapshot>> {
        self.table.try_lock_for(wait).map(|table| table.snapshot())
    }

    pub fn summary(&self) -> RegistrySummary {
        self.lock().summary()
    }
}
