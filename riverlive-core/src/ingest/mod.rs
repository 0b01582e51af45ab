//! Ingest controller boundary
//!
//! The controller provisions and tears down the relay, origin and transcoder
//! resources behind a live stream. The lifecycle code only sees the
//! [`IngestController`] trait; [`NoopIngestController`] stands in when no
//! ingest services are configured.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{ChannelId, SessionId};

pub use http::HttpIngestController;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Rejected(String),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<IngestError>),
}

fn join_errors(errors: &[IngestError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Inputs for provisioning a channel's ingest pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParams {
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    pub stream_key: String,
    pub renditions: Vec<String>,
}

/// One entry of the encoding ladder
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendition {
    pub name: String,
    #[serde(default)]
    pub manifest_url: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub bitrate: i32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// Resources created by a successful boot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootResult {
    pub primary_ingest: Option<String>,
    pub backup_ingest: Option<String>,
    pub origin_url: String,
    pub playback_url: String,
    pub renditions: Vec<Rendition>,
    pub job_ids: Vec<String>,
}

impl BootResult {
    /// Primary then backup endpoint, skipping blanks
    #[must_use]
    pub fn ingest_endpoints(&self) -> Vec<String> {
        [&self.primary_ingest, &self.backup_ingest]
            .into_iter()
            .flatten()
            .map(|endpoint| endpoint.trim())
            .filter(|endpoint| !endpoint.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub component: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    #[must_use]
    pub fn new(component: &str, status: &str) -> Self {
        Self {
            component: component.to_string(),
            status: status.to_string(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Provisions and tears down live ingest pipelines
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestController: Send + Sync {
    async fn boot_stream(&self, params: &BootParams) -> Result<BootResult, IngestError>;

    async fn shutdown_stream(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        job_ids: &[String],
    ) -> Result<(), IngestError>;

    async fn health_checks(&self) -> Vec<HealthStatus>;
}

/// Controller used when no ingest services are configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIngestController;

#[async_trait]
impl IngestController for NoopIngestController {
    async fn boot_stream(&self, _params: &BootParams) -> Result<BootResult, IngestError> {
        Ok(BootResult::default())
    }

    async fn shutdown_stream(
        &self,
        _channel_id: &ChannelId,
        _session_id: &SessionId,
        _job_ids: &[String],
    ) -> Result<(), IngestError> {
        Ok(())
    }

    async fn health_checks(&self) -> Vec<HealthStatus> {
        vec![HealthStatus::new("ingest", "disabled")]
    }
}

/// Parse a ladder such as `1080p:6000,720p:4000`
pub fn parse_ladder(spec: &str) -> crate::Result<Vec<Rendition>> {
    let mut ladder = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((name, bitrate)) = entry.split_once(':') else {
            return Err(crate::Error::InvalidInput(format!("invalid rendition spec {entry:?}")));
        };
        if name.is_empty() || bitrate.contains(':') {
            return Err(crate::Error::InvalidInput(format!("invalid rendition spec {entry:?}")));
        }
        let bitrate = bitrate.parse::<i32>().map_err(|e| {
            crate::Error::InvalidInput(format!("invalid bitrate for rendition {entry:?}: {e}"))
        })?;
        ladder.push(Rendition {
            name: name.to_string(),
            manifest_url: String::new(),
            bitrate,
        });
    }
    if ladder.is_empty() {
        return Err(crate::Error::InvalidInput("no rendition profiles configured".to_string()));
    }
    Ok(ladder)
}
