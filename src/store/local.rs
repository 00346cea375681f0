//! Filesystem artifact store: `<root>/<bucket>/<key>`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::ArtifactError;
use crate::store::traits::ArtifactStore;

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object path, refusing keys that escape the bucket.
    fn path_for(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (safe && !bucket.contains('/') && !bucket.is_empty())
            .then(|| self.root.join(bucket).join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(bucket, key).ok_or_else(|| ArtifactError::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: "invalid object path".to_string(),
        })?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(ArtifactError::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ArtifactError> {
        let put_err = |reason: String| ArtifactError::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };
        let path = self
            .path_for(bucket, key)
            .ok_or_else(|| put_err("invalid object path".to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| put_err(e.to_string()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| put_err(e.to_string()))
    }
}
