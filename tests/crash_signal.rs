//! Fatal-signal handling, exercised in a child process.
//!
//! The parent re-runs this test binary with `CRASH_CHILD_LOG` set. The child
//! registers three tasks, installs the crash handler and raises SIGSEGV; the
//! parent then inspects the exit status and the notifications it recorded.
#![cfg(unix)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use algo_server::error::CrashNotificationError;
use algo_server::report::ModuleInfo;
use algo_server::worker::crash::{self, CrashSweep};
use algo_server::worker::{
    ClosureJob, CrashNotifier, Job, JobOutcome, TaskDescriptor, TaskRecord, TaskRegistry,
};

const CHILD_LOG: &str = "CRASH_CHILD_LOG";

/// Appends `<task_id> <has seg fault code>` per notification and fails for `b`.
struct FileNotifier {
    path: PathBuf,
}

impl CrashNotifier for FileNotifier {
    fn notify(&self, task_id: &str, payload: &str) -> Result<(), CrashNotificationError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CrashNotificationError::Connect(e.to_string()))?;
        writeln!(file, "{task_id} {}", payload.contains("101.002.001"))
            .map_err(|e| CrashNotificationError::Connect(e.to_string()))?;
        if task_id == "b" {
            return Err(CrashNotificationError::Connect("refused".to_string()));
        }
        Ok(())
    }
}

#[test]
fn crash_child_process() {
    let Some(path) = std::env::var_os(CHILD_LOG) else {
        return;
    };

    let registry = Arc::new(TaskRegistry::new());
    let module = ModuleInfo::algorithms_server().stamp("1003", "AIR_ALGORITHM");
    let job: Arc<dyn Job> = Arc::new(ClosureJob::new("noop", |_ctx| async {
        JobOutcome::Succeeded
    }));
    for id in ["a", "b", "c"] {
        let descriptor = TaskDescriptor::new(id, module.clone(), "d");
        registry
            .try_insert(TaskRecord::new(descriptor, Arc::clone(&job)))
            .unwrap();
    }

    let notifier = Arc::new(FileNotifier {
        path: PathBuf::from(path),
    });
    crash::install(CrashSweep::new(registry, notifier)).unwrap();

    unsafe {
        libc::raise(libc::SIGSEGV);
    }
    unreachable!("the crash handler exits the process");
}

#[test]
fn fatal_signal_notifies_every_task_and_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("notifications.log");

    let output = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "crash_child_process", "--test-threads=1", "--nocapture"])
        .env(CHILD_LOG, &log)
        .output()
        .unwrap();

    assert_eq!(
        output.status.code(),
        Some(1),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let notes = std::fs::read_to_string(&log).unwrap();
    assert_eq!(notes, "a true\nb true\nc true\n");
}
