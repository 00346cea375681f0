//! Memory-based admission control.
//!
//! Admission is advisory: host memory is sampled, never reserved, so this
//! bounds how much work is let in at once rather than what a single job
//! actually uses.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AdmissionError;
use crate::host::MemorySampler;
use crate::worker::registry::TaskRegistry;
use crate::worker::task::TaskRecord;

const MB: i64 = 1024 * 1024;

/// Upper bound on admitted memory, relative to total host memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryCeiling {
    /// Admit regardless of memory.
    Disabled,
    /// Admit only while `needed < total * fraction`.
    Fraction(f64),
}

impl MemoryCeiling {
    /// Negative (or NaN) fractions disable the check.
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction.is_nan() || fraction < 0.0 {
            Self::Disabled
        } else {
            Self::Fraction(fraction)
        }
    }
}

/// Gate in front of the [`TaskRegistry`].
pub struct AdmissionController {
    registry: Arc<TaskRegistry>,
    sampler: Arc<dyn MemorySampler>,
    ceiling: MemoryCeiling,
}

impl AdmissionController {
    pub fn new(
        registry: Arc<TaskRegistry>,
        sampler: Arc<dyn MemorySampler>,
        ceiling: MemoryCeiling,
    ) -> Self {
        Self {
            registry,
            sampler,
            ceiling,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn ceiling(&self) -> MemoryCeiling {
        self.ceiling
    }

    /// Admit `record` into the registry or say why not.
    ///
    /// The duplicate check, the memory arithmetic and the insert all happen
    /// under one registry lock, so two concurrent submissions can neither
    /// both claim the same id nor both spend the same headroom.
    pub fn admit(&self, record: TaskRecord) -> Result<(), AdmissionError> {
        let mut table = self.registry.lock();
        let task_id = record.id().to_string();

        if table.contains(&task_id) {
            warn!(task_id = %task_id, "Repeated task");
            return Err(AdmissionError::DuplicateTask { task_id });
        }

        let MemoryCeiling::Fraction(fraction) = self.ceiling else {
            table.try_insert(record)?;
            info!(task_id = %task_id, "Task admitted (memory check disabled)");
            return Ok(());
        };

        let sample = self.sampler.sample().map_err(|e| {
            warn!(task_id = %task_id, error = %e, "Failed to get memory usage");
            e
        })?;

        if table.is_empty() {
            table.set_baseline_used_memory(sample.used);
        }
        let baseline = table.baseline_used_memory();
        let tasks = table.total_memory_estimate();
        let task = record.memory_estimate;
        let needed = baseline.saturating_add(tasks).saturating_add(task);
        let ceiling = (sample.total as f64 * fraction) as i64;

        info!(
            task_id = %task_id,
            "Memory usage. total: {} MB ({} B), used: {} MB ({} B), baseline: {} MB ({} B), \
             tasks: {} MB ({} B), task: {} MB ({} B), needed: {} MB ({} B), max: {} MB ({} B)",
            sample.total / MB, sample.total,
            sample.used / MB, sample.used,
            baseline / MB, baseline,
            tasks / MB, tasks,
            task / MB, task,
            needed / MB, needed,
            ceiling / MB, ceiling,
        );

        if needed >= ceiling {
            warn!(task_id = %task_id, needed, ceiling, "Not enough memory");
            return Err(AdmissionError::NotEnoughMemory { needed, ceiling });
        }

        table.try_insert(record)?;
        info!(task_id = %task_id, "Task admitted");
        Ok(())
    }
}
