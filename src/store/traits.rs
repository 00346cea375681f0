//! Backend-agnostic traits for the two external stores a job talks to.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ArtifactError, StoreError};

/// Key-value + pub/sub store used for task status reporting.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write `value` under `key` in database `index`, expiring after `ttl`.
    async fn set(&self, index: u32, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Broadcast `message` on `channel` through database `index`.
    async fn publish(&self, index: u32, channel: &str, message: &str) -> Result<(), StoreError>;
}

/// Object storage holding task input and output artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read the object at `key` in `bucket`.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Write `body` to `key` in `bucket`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ArtifactError>;
}
