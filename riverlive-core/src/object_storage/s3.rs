// S3-compatible object storage for recording artifacts
//
// Uses OpenDAL's S3 service with path-style addressing and SigV4 signing,
// which covers AWS S3, MinIO and other compatible stores.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{services::S3, Operator};
use std::time::Duration;

use super::{ObjectReference, ObjectStorageClient, ObjectStorageError};
use crate::config::ObjectStorageConfig;
use crate::resilience::with_timeout;
use crate::{Error, Result};

/// S3-backed artifact storage
pub struct S3ObjectStorage {
    operator: Operator,
    prefix: String,
    public_endpoint: String,
    request_timeout: Duration,
}

impl S3ObjectStorage {
    pub fn new(config: &ObjectStorageConfig) -> Result<Self> {
        let endpoint = normalize_endpoint(&config.endpoint, config.use_ssl)?;
        tracing::info!(
            "Initializing object storage: bucket={}, endpoint={}",
            config.bucket,
            endpoint
        );

        let region = match config.region.trim() {
            "" => "us-east-1",
            region => region,
        };
        let mut builder = S3::default()
            .root("/")
            .endpoint(&endpoint)
            .bucket(config.bucket.trim())
            .region(region)
            .disable_config_load();

        let access_key = config.access_key.trim();
        let secret_key = config.secret_key.trim();
        if access_key.is_empty() || secret_key.is_empty() {
            builder = builder.allow_anonymous();
        } else {
            builder = builder.access_key_id(access_key).secret_access_key(secret_key);
        }

        let operator = Operator::new(builder)
            .map_err(|e| Error::Internal(format!("Failed to build object storage operator: {e}")))?
            .finish();

        Ok(Self::from_operator(
            operator,
            &config.prefix,
            &config.public_endpoint,
            config.request_timeout(),
        ))
    }

    /// Wrap an already-built operator
    #[must_use]
    pub fn from_operator(
        operator: Operator,
        prefix: &str,
        public_endpoint: &str,
        request_timeout: Duration,
    ) -> Self {
        Self {
            operator,
            prefix: prefix.trim().trim_matches('/').to_string(),
            public_endpoint: public_endpoint.trim().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// Prefix a logical key; keys that already carry the prefix pass through
    fn apply_prefix(&self, key: &str) -> String {
        let key = key.trim().trim_start_matches('/');
        if self.prefix.is_empty() {
            return key.to_string();
        }
        if key.is_empty() {
            return self.prefix.clone();
        }
        if key == self.prefix || key.starts_with(&format!("{}/", self.prefix)) {
            return key.to_string();
        }
        format!("{}/{key}", self.prefix)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        if self.public_endpoint.is_empty() {
            return None;
        }
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Some(self.public_endpoint.clone());
        }
        Some(format!("{}/{key}", self.public_endpoint))
    }
}

fn normalize_endpoint(endpoint: &str, use_ssl: bool) -> Result<String> {
    let endpoint = endpoint.trim();
    let endpoint = if endpoint.contains("://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    };
    let parsed = url::Url::parse(&endpoint)
        .map_err(|e| Error::InvalidInput(format!("invalid object storage endpoint {endpoint:?}: {e}")))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl ObjectStorageClient for S3ObjectStorage {
    fn enabled(&self) -> bool {
        true
    }

    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> std::result::Result<ObjectReference, ObjectStorageError> {
        let object_key = self.apply_prefix(key);
        if object_key.is_empty() {
            return Err(ObjectStorageError::Rejected("object key is required".to_string()));
        }
        let size = body.len();

        with_timeout(
            self.request_timeout,
            async {
                self.operator
                    .write_with(&object_key, body)
                    .content_type(content_type)
                    .await
                    .map_err(|source| ObjectStorageError::Upload {
                        key: object_key.clone(),
                        source,
                    })
            },
            || ObjectStorageError::Timeout {
                operation: "upload",
                key: object_key.clone(),
                timeout: self.request_timeout,
            },
        )
        .await?;

        tracing::trace!("Uploaded object: {} ({} bytes)", object_key, size);
        Ok(ObjectReference {
            url: self.public_url(&object_key),
            key: object_key,
        })
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), ObjectStorageError> {
        let object_key = self.apply_prefix(key);
        if object_key.is_empty() {
            return Ok(());
        }

        with_timeout(
            self.request_timeout,
            async {
                self.operator
                    .delete(&object_key)
                    .await
                    .map_err(|source| ObjectStorageError::Delete {
                        key: object_key.clone(),
                        source,
                    })
            },
            || ObjectStorageError::Timeout {
                operation: "delete",
                key: object_key.clone(),
                timeout: self.request_timeout,
            },
        )
        .await?;

        tracing::trace!("Deleted object: {}", object_key);
        Ok(())
    }
}
