use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::clip::ClipSummary;
use super::id::{ChannelId, RecordingId, SessionId, ThumbnailId};

pub const MANIFEST_METADATA_PREFIX: &str = "object:manifest:";
pub const THUMBNAIL_METADATA_PREFIX: &str = "object:thumbnail:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRendition {
    pub name: String,
    pub manifest_url: String,
    #[serde(default)]
    pub bitrate: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingThumbnail {
    pub id: ThumbnailId,
    pub recording_id: RecordingId,
    #[serde(default)]
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: RecordingId,
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    pub title: String,
    pub duration_seconds: i32,
    #[serde(default)]
    pub playback_base_url: String,
    #[serde(default)]
    pub renditions: Vec<RecordingRendition>,
    #[serde(default)]
    pub thumbnails: Vec<RecordingThumbnail>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_until: Option<DateTime<Utc>>,
    /// Derived on read from the recording's clip exports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clips: Vec<ClipSummary>,
}

/// Kind of remote object a recording owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Manifest,
    Thumbnail,
}

impl ArtifactKind {
    #[must_use]
    pub const fn metadata_prefix(&self) -> &'static str {
        match self {
            Self::Manifest => MANIFEST_METADATA_PREFIX,
            Self::Thumbnail => THUMBNAIL_METADATA_PREFIX,
        }
    }
}

/// Typed view of one `object:*` metadata entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub name: String,
    pub key: String,
}

impl Recording {
    #[must_use]
    pub const fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Eligible for purge once `retain_until` has passed
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retain_until.is_some_and(|deadline| deadline <= now)
    }

    /// Record a remote object as owned by this recording
    pub fn record_artifact(&mut self, kind: ArtifactKind, name: &str, key: &str) {
        self.metadata
            .insert(format!("{}{name}", kind.metadata_prefix()), key.to_string());
    }

    /// Remote objects referenced by metadata, deduplicated by key
    #[must_use]
    pub fn artifact_refs(&self) -> Vec<ArtifactRef> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for (entry, value) in &self.metadata {
            let (kind, name) = if let Some(name) = entry.strip_prefix(MANIFEST_METADATA_PREFIX) {
                (ArtifactKind::Manifest, name)
            } else if let Some(name) = entry.strip_prefix(THUMBNAIL_METADATA_PREFIX) {
                (ArtifactKind::Thumbnail, name)
            } else {
                continue;
            };
            let key = value.trim();
            if key.is_empty() || !seen.insert(key.to_string()) {
                continue;
            }
            refs.push(ArtifactRef {
                kind,
                name: name.to_string(),
                key: key.to_string(),
            });
        }
        refs
    }
}

/// Newest first, ties by id descending
pub fn sort_recordings(recordings: &mut [Recording]) {
    recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}
