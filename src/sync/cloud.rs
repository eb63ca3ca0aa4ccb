//! S3-compatible object storage for snap media

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use super::remote::ObjectStore;
use crate::error::{Result, SoulSnapsError};

/// Object store backed by S3, R2, MinIO or a Supabase storage S3 endpoint
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Credentials and region from the standard AWS environment
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            client: S3Client::new(&config),
        }
    }

    /// Custom endpoint with path-style addressing (non-AWS providers)
    pub async fn with_endpoint(endpoint: &str) -> Result<Self> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(SoulSnapsError::Config(format!(
                "object storage endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        Ok(Self {
            client: S3Client::from_conf(config),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| SoulSnapsError::ObjectStorage(e.to_string()))?;

        tracing::info!("Uploaded {} bytes to s3://{}/{}", size, bucket, path);
        Ok(())
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| SoulSnapsError::ObjectStorage(e.to_string()))?;

        tracing::debug!("Deleted s3://{}/{}", bucket, path);
        Ok(())
    }
}
