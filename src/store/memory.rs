//! In-memory stores with failure injection, for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ArtifactError, StoreError};
use crate::store::traits::{ArtifactStore, StatusStore};

/// One recorded status-store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOp {
    Set {
        index: u32,
        key: String,
        value: String,
        ttl: Duration,
    },
    Publish {
        index: u32,
        channel: String,
        message: String,
    },
}

/// Status store that records every operation.
#[derive(Default)]
pub struct MemoryStatusStore {
    ops: Mutex<Vec<StatusOp>>,
    failing_keys: Mutex<HashSet<String>>,
    fail_publish: Mutex<bool>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `set` on `key` fail.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.lock().insert(key.into());
    }

    /// Make every `publish` fail.
    pub fn fail_publishes(&self, fail: bool) {
        *self.fail_publish.lock() = fail;
    }

    pub fn ops(&self) -> Vec<StatusOp> {
        self.ops.lock().clone()
    }

    /// Latest value written under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.ops.lock().iter().rev().find_map(|op| match op {
            StatusOp::Set { key: k, value, .. } if k == key => Some(value.clone()),
            _ => None,
        })
    }

    /// Messages published on `channel`, oldest first.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                StatusOp::Publish {
                    channel: c,
                    message,
                    ..
                } if c == channel => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set(
        &self,
        index: u32,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if self.failing_keys.lock().contains(key) {
            return Err(StoreError::Set {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.ops.lock().push(StatusOp::Set {
            index,
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(())
    }

    async fn publish(&self, index: u32, channel: &str, message: &str) -> Result<(), StoreError> {
        if *self.fail_publish.lock() {
            return Err(StoreError::Publish {
                channel: channel.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.ops.lock().push(StatusOp::Publish {
            index,
            channel: channel.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Artifact store backed by a map of `(bucket, key)` to bytes.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_puts: Mutex<bool>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock() = fail;
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError> {
        self.get(bucket, key).ok_or_else(|| ArtifactError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ArtifactError> {
        if *self.fail_puts.lock() {
            return Err(ArtifactError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.insert(bucket, key, body);
        Ok(())
    }
}
