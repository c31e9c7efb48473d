#[cfg(feature = "s3")]
use crate::domain::ports::Storage;
#[cfg(feature = "s3")]
use crate::utils::error::{ImagenieError, Result};
#[cfg(feature = "s3")]
use aws_sdk_s3::primitives::ByteStream;
#[cfg(feature = "s3")]
use aws_sdk_s3::Client as S3Client;
#[cfg(feature = "s3")]
use std::path::Path;

/// Bucket-backed artifact store for converted SIF images.
#[cfg(feature = "s3")]
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    prefix: String,
}

#[cfg(feature = "s3")]
impl S3Storage {
    pub fn new(client: S3Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Client from the default AWS credential chain, optionally pinned to a region.
    pub async fn from_env(bucket: String, prefix: String, region: Option<String>) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(region) = region {
            builder = builder.region(aws_sdk_s3::config::Region::new(region));
        }
        Self::new(S3Client::from_conf(builder.build()), bucket, prefix)
    }

    fn object_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[cfg(feature = "s3")]
impl Storage for S3Storage {
    async fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| ImagenieError::StorageError {
                message: format!("Failed to read s3://{}/{}: {}", self.bucket, key, e),
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| ImagenieError::StorageError {
                message: format!("Failed to collect S3 data: {}", e),
            })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, key: &str, data: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| ImagenieError::StorageError {
                message: format!("Failed to write s3://{}/{}: {}", self.bucket, object_key, e),
            })?;
        Ok(())
    }

    async fn upload_file(&self, key: &str, path: &Path) -> Result<String> {
        let object_key = self.object_key(key);
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ImagenieError::StorageError {
                message: format!("Failed to open {}: {}", path.display(), e),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type("application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| ImagenieError::StorageError {
                message: format!("Failed to upload to s3://{}/{}: {}", self.bucket, object_key, e),
            })?;

        Ok(format!("s3://{}/{}", self.bucket, object_key))
    }
}
