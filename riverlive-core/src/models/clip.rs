use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ChannelId, ClipId, RecordingId, SessionId};

/// Render status of a clip export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ClipStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ClipStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidInput(format!("invalid clip status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipExport {
    pub id: ClipId,
    pub recording_id: RecordingId,
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    #[serde(default)]
    pub title: String,
    pub start_seconds: i32,
    pub end_seconds: i32,
    pub status: ClipStatus,
    #[serde(default)]
    pub playback_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub storage_object: String,
}

impl ClipExport {
    #[must_use]
    pub fn summary(&self) -> ClipSummary {
        ClipSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            start_seconds: self.start_seconds,
            end_seconds: self.end_seconds,
            status: self.status,
        }
    }

    /// Apply a worker update; `completed_at` keeps microsecond precision like every stored timestamp
    pub fn apply_update(&mut self, update: &ClipExportUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(url) = &update.playback_url {
            self.playback_url = url.trim().to_string();
        }
        if let Some(object) = &update.storage_object {
            self.storage_object = object.trim().to_string();
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at.trunc_subsecs(6));
        }
    }
}

/// Clip summary embedded in a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSummary {
    pub id: ClipId,
    #[serde(default)]
    pub title: String,
    pub start_seconds: i32,
    pub end_seconds: i32,
    pub status: ClipStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ClipExportParams {
    pub title: String,
    pub start_seconds: i32,
    pub end_seconds: i32,
}

/// Fields an external render worker may set
#[derive(Debug, Clone, Default)]
pub struct ClipExportUpdate {
    pub status: Option<ClipStatus>,
    pub playback_url: Option<String>,
    pub storage_object: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Clip summaries ordered by start offset, ties by id
#[must_use]
pub fn summarize_clips<'a>(clips: impl IntoIterator<Item = &'a ClipExport>) -> Vec<ClipSummary> {
    let mut summaries: Vec<ClipSummary> = clips.into_iter().map(ClipExport::summary).collect();
    summaries.sort_by(|a, b| a.start_seconds.cmp(&b.start_seconds).then_with(|| a.id.cmp(&b.id)));
    summaries
}

/// Newest first, ties by id descending
pub fn sort_clip_exports(clips: &mut [ClipExport]) {
    clips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}
