//! Task execution core — admission, scheduling and crash recovery.
//!
//! Core components:
//! - `state` — Task state machine (Standby → InProgress → Completed)
//! - `task` — Task records, descriptors and the `Job` capability
//! - `registry` — Mutex-guarded task table
//! - `admission` — Memory-based admission control
//! - `context` — Per-task execution context (progress, artifacts, final status)
//! - `worker` — Runs one task's job and completes it
//! - `scheduler` — Fixed-interval dispatch/reap loop
//! - `crash` — Fatal-signal sweep over outstanding tasks

pub mod admission;
pub mod context;
pub mod crash;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod worker;

pub use admission::{AdmissionController, MemoryCeiling};
pub use context::{ContextFactory, ContextSettings, ExecutionContext};
pub use crash::{CrashNotifier, CrashSweep, SweepReport};
pub use registry::{RegistrySummary, TaskEntry, TaskRegistry, TaskSnapshot};
pub use scheduler::{Scheduler, TickReport};
pub use state::TaskStatus;
pub use task::{ClosureJob, Job, JobOutcome, TaskDescriptor, TaskRecord};
pub use worker::Worker;
