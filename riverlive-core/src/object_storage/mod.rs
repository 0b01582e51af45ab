//! Object storage boundary
//!
//! Recording artifacts are uploaded through [`ObjectStorageClient`]. Logical
//! keys are built here; bucket prefixes and public URLs are the client's
//! business.

pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ObjectStorageConfig;

pub use s3::S3ObjectStorage;

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("{operation} {key} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        key: String,
        timeout: Duration,
    },

    #[error("upload {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("delete {key}: {source}")]
    Delete {
        key: String,
        #[source]
        source: opendal::Error,
    },

    #[error("{0}")]
    Rejected(String),
}

/// Where an uploaded object landed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectReference {
    /// Key as stored, including any client-side prefix
    pub key: String,
    pub url: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// False for the disabled client
    fn enabled(&self) -> bool;

    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<ObjectReference, ObjectStorageError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStorageError>;
}

/// Client used when no bucket or endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObjectStorage;

#[async_trait]
impl ObjectStorageClient for NoopObjectStorage {
    fn enabled(&self) -> bool {
        false
    }

    async fn upload(
        &self,
        _key: &str,
        _content_type: &str,
        _body: Bytes,
    ) -> Result<ObjectReference, ObjectStorageError> {
        Ok(ObjectReference::default())
    }

    async fn delete(&self, _key: &str) -> Result<(), ObjectStorageError> {
        Ok(())
    }
}

/// S3 client when configured, otherwise the no-op client
pub fn build_object_storage(config: &ObjectStorageConfig) -> crate::Result<Arc<dyn ObjectStorageClient>> {
    if !config.is_enabled() {
        tracing::info!("Object storage not configured, recording artifacts stay metadata-only");
        return Ok(Arc::new(NoopObjectStorage));
    }
    Ok(Arc::new(S3ObjectStorage::new(config)?))
}

/// Join trimmed, non-empty path segments with `/`
#[must_use]
pub fn build_object_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Slug safe for use as a key segment: lowercase `[a-z0-9]` runs joined by `-`
#[must_use]
pub fn normalize_object_component(component: &str) -> String {
    let mut slug = String::with_capacity(component.len());
    let mut pending_dash = false;
    for ch in component.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug
    }
}
