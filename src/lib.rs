//! Algorithms server — memory-aware compute-job admission and scheduling.

pub mod api;
pub mod config;
pub mod error;
pub mod host;
pub mod jobs;
pub mod report;
pub mod store;
pub mod worker;
