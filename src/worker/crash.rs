//! Crash recovery: tell observers about every outstanding task before the
//! process dies on a fatal signal.
//!
//! The handler runs in a compromised process, so the sweep is best-effort.
//! It snapshots the registry with a bounded wait rather than a blocking lock,
//! notifies each task through a synchronous [`CrashNotifier`], ignores
//! individual failures and then exits with status 1.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::{error, info};

use crate::error::{CrashInstallError, CrashNotificationError};
use crate::report::ErrorReport;
use crate::worker::registry::TaskRegistry;

/// Signals treated as unrecoverable.
pub const FATAL_SIGNALS: [Signal; 4] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
];

const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(200);

static CRASH_SWEEP: OnceLock<CrashSweep> = OnceLock::new();

/// Delivers one crash notification. Must not depend on the async runtime.
pub trait CrashNotifier: Send + Sync {
    /// Write `payload` under `<taskId>:error` and announce `task_id` on the
    /// error channel.
    fn notify(&self, task_id: &str, payload: &str) -> Result<(), CrashNotificationError>;
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// False when the registry lock could not be taken in time.
    pub snapshot_taken: bool,
    pub attempted: usize,
    pub failed: usize,
}

/// The registry walk performed on a fatal signal.
pub struct CrashSweep {
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn CrashNotifier>,
    lock_wait: Duration,
}

impl CrashSweep {
    pub fn new(registry: Arc<TaskRegistry>, notifier: Arc<dyn CrashNotifier>) -> Self {
        Self {
            registry,
            notifier,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Notify every registered task once.
    pub fn run(&self, signal: &str) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(tasks) = self.registry.try_snapshot(self.lock_wait) else {
            error!(signal, "Crash sweep could not lock the task registry");
            return report;
        };
        report.snapshot_taken = true;

        for task in tasks {
            report.attempted += 1;
            let payload =
                ErrorReport::segmentation_fault(task.descriptor.module.clone(), signal).to_json();
            if let Err(e) = self.notifier.notify(&task.task_id, &payload) {
                report.failed += 1;
                error!(task_id = %task.task_id, error = %e, "Crash notification failed");
            }
        }

        error!(
            signal,
            attempted = report.attempted,
            failed = report.failed,
            "Crash sweep finished"
        );
        report
    }
}

/// Register `sweep` and route every fatal signal through it.
///
/// Only one sweep can be installed per process.
pub fn install(sweep: CrashSweep) -> Result<(), CrashInstallError> {
    CRASH_SWEEP
        .set(sweep)
        .map_err(|_| CrashInstallError::AlreadyInstalled)?;

    let action = SigAction::new(
        SigHandler::Handler(on_fatal_signal),
        SaFlags::SA_RESETHAND | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    for signal in FATAL_SIGNALS {
        // SAFETY: the handler only reads the process-wide sweep and then
        // terminates with `_exit`; it never returns into the faulting code.
        unsafe { sigaction(signal, &action) }.map_err(|source| CrashInstallError::Sigaction {
            signal: signal.as_str().to_string(),
            source,
        })?;
    }

    info!(signals = ?FATAL_SIGNALS.map(|s| s.as_str()), "Crash handler installed");
    Ok(())
}

extern "C" fn on_fatal_signal(signum: libc::c_int) {
    let name = Signal::try_from(signum)
        .map(|s| s.as_str())
        .unwrap_or("UNKNOWN");
    if let Some(sweep) = CRASH_SWEEP.get() {
        sweep.run(name);
    }
    // SAFETY: `_exit` is async-signal-safe and skips atexit handlers.
    unsafe { libc::_exit(1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ModuleInfo;
    use crate::worker::task::{ClosureJob, JobOutcome, TaskDescriptor, TaskRecord};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        fail_for: Option<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl CrashNotifier for RecordingNotifier {
        fn notify(&self, task_id: &str, payload: &str) -> Result<(), CrashNotificationError> {
            self.calls
                .lock()
                .push((task_id.to_string(), payload.to_string()));
            if self.fail_for.as_deref() == Some(task_id) {
                return Err(CrashNotificationError::Connect("refused".to_string()));
            }
            Ok(())
        }
    }

    fn registry_with(ids: &[&str]) -> Arc<TaskRegistry> {
        let registry = Arc::new(TaskRegistry::new());
        let module = ModuleInfo::algorithms_server().stamp("1003", "AIR_ALGORITHM");
        for id in ids {
            let job = Arc::new(ClosureJob::new("noop", |_ctx| async { JobOutcome::Succeeded }));
            let record = TaskRecord::new(TaskDescriptor::new(*id, module.clone(), "jobs"), job);
            registry.try_insert(record).unwrap();
        }
        registry
    }

    #[test]
    fn notifies_every_task_once() {
        let registry = registry_with(&["a", "b", "c"]);
        let notifier = Arc::new(RecordingNotifier::default());
        let report = CrashSweep::new(registry, notifier.clone()).run("SIGSEGV");

        assert_eq!(
            report,
            SweepReport {
                snapshot_taken: true,
                attempted: 3,
                failed: 0
            }
        );
        let calls = notifier.calls.lock();
        let ids: Vec<&str> = calls.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let payload: serde_json::Value = serde_json::from_str(&calls[0].1).unwrap();
        assert_eq!(payload["errors"][0]["code"], "101.002.001");
        assert_eq!(payload["errors"][0]["message"], "SIGSEGV");
    }

    #[test]
    fn one_failure_does_not_stop_the_sweep() {
        let registry = registry_with(&["a", "b", "c"]);
        let notifier = Arc::new(RecordingNotifier {
            fail_for: Some("b".to_string()),
            ..Default::default()
        });
        let report = CrashSweep::new(registry, notifier.clone()).run("SIGBUS");

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(notifier.calls.lock().len(), 3);
    }

    #[test]
    fn gives_up_when_registry_is_held() {
        let registry = registry_with(&["a"]);
        let notifier = Arc::new(RecordingNotifier::default());
        let sweep = CrashSweep::new(registry.clone(), notifier.clone())
            .with_lock_wait(Duration::from_millis(10));

        let _guard = registry.lock();
        let report = sweep.run("SIGSEGV");
        assert!(!report.snapshot_taken);
        assert!(notifier.calls.lock().is_empty());
    }

    #[test]
    fn empty_registry_sweeps_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let report = CrashSweep::new(registry_with(&[]), notifier).run("SIGILL");
        assert_eq!(report.attempted, 0);
        assert!(report.snapshot_taken);
    }
}
