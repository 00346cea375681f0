//! External stores — status reporting (Redis) and artifact storage (S3 or local disk).

pub mod local;
pub mod memory;
pub mod redis;
pub mod s3;
pub mod traits;

pub use local::LocalArtifactStore;
pub use memory::{MemoryArtifactStore, MemoryStatusStore};
pub use self::redis::{RedisCrashNotifier, RedisStatusStore};
pub use s3::S3ArtifactStore;
pub use traits::{ArtifactStore, StatusStore};

/// Channel announcing that `<taskId>:status` changed.
pub const STATUS_CHANNEL: &str = "ALGO_STATUS";

/// Channel announcing that `<taskId>:error` was written.
pub const ERROR_CHANNEL: &str = "ALGO_ERROR";

/// Which per-task key to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKey {
    Status,
    Error,
}

impl StatusKey {
    /// `<taskId>:status` or `<taskId>:error`.
    pub fn for_task(&self, task_id: &str) -> String {
        let suffix = match self {
            Self::Status => "status",
            Self::Error => "error",
        };
        format!("{task_id}:{suffix}")
    }

    /// Broadcast channel paired with this key.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Status => STATUS_CHANNEL,
            Self::Error => ERROR_CHANNEL,
        }
    }
}

/// Join an output directory and an object name with exactly one slash.
pub fn object_key(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.trim_start_matches('/').to_string();
    }
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_keys() {
        assert_eq!(StatusKey::Status.for_task("t1"), "t1:status");
        assert_eq!(StatusKey::Error.for_task("t1"), "t1:error");
        assert_eq!(StatusKey::Error.channel(), "ALGO_ERROR");
    }

    #[test]
    fn object_key_single_slash() {
        assert_eq!(object_key("jobs/42/", "output"), "jobs/42/output");
        assert_eq!(object_key("jobs/42", "/output"), "jobs/42/output");
        assert_eq!(object_key("", "input"), "input");
    }
}
