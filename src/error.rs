//! Error types for the algorithm server.

use std::time::Duration;

use crate::report::ErrorKind;

/// Configuration-related errors.
///
/// These are collected while reading the environment and reported as
/// warnings; the affected setting keeps its default.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error, {key}, Does not exist.")]
    Missing { key: String },

    #[error("Environment variable error, {key}, {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    /// Name of the environment variable this error refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::Missing { key } | Self::InvalidValue { key, .. } => key,
        }
    }
}

/// Host memory sampling errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SampleError {
    #[error("Host reported no memory information")]
    Unavailable,

    #[error("Memory sample failed: {0}")]
    Failed(String),
}

/// Reasons a submission is refused entry into the registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmissionError {
    #[error("Repeated task: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("Failed to sample memory usage: {0}")]
    MemorySampleFailed(#[from] SampleError),

    #[error("Not enough memory: need {needed} B, max {ceiling} B")]
    NotEnoughMemory { needed: i64, ceiling: i64 },
}

impl AdmissionError {
    /// Exclusive code used in the `TTT.SSS.EEE` server error code.
    pub fn exclusive_code(&self) -> u16 {
        match self {
            Self::DuplicateTask { .. } => 1,
            Self::MemorySampleFailed(_) => 2,
            Self::NotEnoughMemory { .. } => 3,
        }
    }
}

/// Registry errors. Internal only, never surfaced to submitters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Task {task_id} not found")]
    NotFound { task_id: String },

    #[error("Task {task_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

/// Errors returned to a running job from its execution-context callbacks.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("No current task: the execution context for {task_id} is closed")]
    NoCurrentTask { task_id: String },

    #[error("Data format error, progress: {value}")]
    OutOfRange { value: i64 },

    #[error("Status store write failed: {0}")]
    StoreWriteFailed(#[from] StoreError),

    #[error("Artifact upload failed: {0}")]
    UploadFailed(#[from] ArtifactError),
}

/// Key-value / pub-sub status store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Set {key} failed: {reason}")]
    Set { key: String, reason: String },

    #[error("Publish on {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("No connection for index {index}")]
    UnknownIndex { index: u32 },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Sub-type this failure is logged under.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Set { .. } => ErrorKind::RedisSet,
            Self::Publish { .. } => ErrorKind::RedisPub,
            Self::Connect(_) | Self::UnknownIndex { .. } | Self::Timeout(_) => {
                ErrorKind::RedisConnect
            }
        }
    }
}

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to stage {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Get object {bucket}/{key} failed: {reason}")]
    Get {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Put object {bucket}/{key} failed: {reason}")]
    Put {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
}

impl ArtifactError {
    /// Sub-type this failure is logged under.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Get { .. } | Self::NotFound { .. } => ErrorKind::GetObject,
            Self::Staging { .. } | Self::Put { .. } => ErrorKind::PutObject,
        }
    }
}

/// Errors raised by a compute kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Failed to launch kernel {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Kernel exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("Kernel failed: {0}")]
    Failed(String),

    #[error("Kernel callback failed: {0}")]
    Callback(#[from] CallbackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A crash notification could not be delivered. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum CrashNotificationError {
    #[error("Redis connect failed: {0}")]
    Connect(String),

    #[error("Redis set {key} failed: {reason}")]
    Set { key: String, reason: String },

    #[error("Redis publish on {channel} failed: {reason}")]
    Publish { channel: String, reason: String },
}

/// Installing the fatal-signal handler failed.
#[derive(Debug, thiserror::Error)]
pub enum CrashInstallError {
    #[error("Crash handler already installed")]
    AlreadyInstalled,

    #[error("sigaction({signal}) failed: {source}")]
    Sigaction {
        signal: String,
        #[source]
        source: nix::errno::Errno,
    },
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_redis_kinds() {
        let set = StoreError::Set {
            key: "t1:status".into(),
            reason: "READONLY".into(),
        };
        assert_eq!(set.error_kind(), ErrorKind::RedisSet);
        let publish = StoreError::Publish {
            channel: "ALGO_STATUS".into(),
            reason: "closed".into(),
        };
        assert_eq!(publish.error_kind(), ErrorKind::RedisPub);
        assert_eq!(
            StoreError::Timeout(Duration::from_secs(3)).error_kind(),
            ErrorKind::RedisConnect
        );
    }

    #[test]
    fn artifact_errors_map_to_object_kinds() {
        let missing = ArtifactError::NotFound {
            bucket: "b".into(),
            key: "d/input".into(),
        };
        assert_eq!(missing.error_kind(), ErrorKind::GetObject);
        let put = ArtifactError::Put {
            bucket: "b".into(),
            key: "d/output".into(),
            reason: "denied".into(),
        };
        assert_eq!(put.error_kind(), ErrorKind::PutObject);
        assert_eq!(put.error_kind().code(), 3);
    }
}
