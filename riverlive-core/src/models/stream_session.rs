use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ChannelId, SessionId};

/// Manifest published by the ingest pipeline for one rendition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenditionManifest {
    pub name: String,
    pub manifest_url: String,
    #[serde(default)]
    pub bitrate: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSession {
    pub id: SessionId,
    pub channel_id: ChannelId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub renditions: Vec<String>,
    #[serde(default)]
    pub peak_concurrent: i32,
    #[serde(default)]
    pub origin_url: String,
    #[serde(default)]
    pub playback_url: String,
    #[serde(default)]
    pub ingest_endpoints: Vec<String>,
    #[serde(default)]
    pub ingest_job_ids: Vec<String>,
    #[serde(default)]
    pub rendition_manifests: Vec<RenditionManifest>,
}

impl StreamSession {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Stamp the end of the session, keeping the highest viewer count seen
    pub fn end(&mut self, ended_at: DateTime<Utc>, peak_concurrent: i32) {
        self.ended_at = Some(ended_at);
        self.peak_concurrent = self.peak_concurrent.max(peak_concurrent);
    }
}

/// Newest first, ties by id descending
pub fn sort_sessions(sessions: &mut [StreamSession]) {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
}
