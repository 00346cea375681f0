//! S3 artifact store.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use crate::config::ArtifactConfig;
use crate::error::ArtifactError;
use crate::store::traits::ArtifactStore;

/// [`ArtifactStore`] over the AWS SDK.
///
/// Credentials come from the standard AWS chain (`AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY`, profiles, instance metadata).
pub struct S3ArtifactStore {
    client: Client,
}

impl S3ArtifactStore {
    pub async fn from_config(config: &ArtifactConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            region = config.region.as_deref().unwrap_or("default"),
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            "S3 artifact store ready"
        );

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let get_err = |reason: String| ArtifactError::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };

        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    ArtifactError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    get_err(e.to_string())
                }
            })?;

        let body = object
            .body
            .collect()
            .await
            .map_err(|e| get_err(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), ArtifactError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ArtifactError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
