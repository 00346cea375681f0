//! Host memory sampling used by admission control.

use parking_lot::Mutex;
use sysinfo::System;

use crate::error::SampleError;

/// One observation of host memory, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub total: i64,
    pub used: i64,
}

/// Source of host memory figures.
///
/// Called with the registry lock held, so implementations must not block on
/// anything slower than a local system call.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemorySample, SampleError>;
}

/// Samples the real host through `sysinfo`.
pub struct SystemMemorySampler {
    system: Mutex<System>,
}

impl SystemMemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemMemorySampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError::Unavailable);
        }
        let to_i64 = |bytes: u64| {
            i64::try_from(bytes).map_err(|_| SampleError::Failed(format!("{bytes} B overflows")))
        };

        Ok(MemorySample {
            total: to_i64(total)?,
            used: to_i64(system.used_memory())?,
        })
    }
}

/// Sampler returning a fixed, adjustable reading.
///
/// Used in tests and when running without a real host view.
pub struct StaticMemorySampler {
    reading: Mutex<Result<MemorySample, SampleError>>,
}

impl StaticMemorySampler {
    pub fn new(total: i64, used: i64) -> Self {
        Self {
            reading: Mutex::new(Ok(MemorySample { total, used })),
        }
    }

    /// A sampler whose every reading fails.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            reading: Mutex::new(Err(SampleError::Failed(reason.into()))),
        }
    }

    pub fn set(&self, total: i64, used: i64) {
        *self.reading.lock() = Ok(MemorySample { total, used });
    }

    pub fn set_used(&self, used: i64) {
        let mut reading = self.reading.lock();
        let total = reading.as_ref().map(|s| s.total).unwrap_or(0);
        *reading = Ok(MemorySample { total, used });
    }
}

impl MemorySampler for StaticMemorySampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
        self.reading.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sampler_reports_plausible_values() {
        let sample = SystemMemorySampler::new().sample().unwrap();
        assert!(sample.total > 0);
        assert!(sample.used <= sample.total);
    }

    #[test]
    fn static_sampler_can_change_reading() {
        let sampler = StaticMemorySampler::new(1000, 400);
        assert_eq!(sampler.sample().unwrap(), MemorySample { total: 1000, used: 400 });
        sampler.set_used(600);
        assert_eq!(sampler.sample().unwrap().used, 600);
    }

    #[test]
    fn failing_sampler_errors() {
        let sampler = StaticMemorySampler::failing("free cmd error");
        assert!(matches!(sampler.sample(), Err(SampleError::Failed(_))));
    }
}
