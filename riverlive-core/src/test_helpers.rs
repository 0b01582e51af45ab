//! Test helpers and fixtures for riverlive-core tests

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::{
    Channel, ChannelId, ClipExport, ClipId, ClipStatus, LiveState, Recording, RecordingId,
    RenditionManifest, SessionId, StreamSession, UserId,
};
use crate::service::Clock;

/// 2024-05-01T12:00:00Z
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Clock frozen at [`epoch`]
pub fn fixed_clock() -> Clock {
    Arc::new(epoch)
}

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(epoch())))
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock() += by;
    }

    pub fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock())
    }
}

/// Test fixture builder for Channel
pub struct ChannelFixture {
    id: ChannelId,
    owner_id: UserId,
    title: String,
    tags: Vec<String>,
}

impl ChannelFixture {
    pub fn new() -> Self {
        Self {
            id: ChannelId::new(),
            owner_id: UserId::from("owner"),
            title: "Show".to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(ToString::to_string).collect();
        self
    }

    pub fn build(self) -> Channel {
        Channel {
            id: self.id,
            owner_id: self.owner_id,
            stream_key: "0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF".to_string(),
            title: self.title,
            category: String::new(),
            tags: self.tags,
            live_state: LiveState::Offline,
            current_session_id: None,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }
}

/// Test fixture builder for StreamSession
pub struct SessionFixture {
    channel_id: ChannelId,
    peak_concurrent: i32,
    manifests: Vec<RenditionManifest>,
}

impl SessionFixture {
    pub fn new() -> Self {
        Self {
            channel_id: ChannelId::new(),
            peak_concurrent: 0,
            manifests: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel_id: &ChannelId) -> Self {
        self.channel_id = channel_id.clone();
        self
    }

    pub fn with_peak(mut self, peak: i32) -> Self {
        self.peak_concurrent = peak;
        self
    }

    pub fn with_manifest(mut self, name: &str, url: &str, bitrate: i32) -> Self {
        self.manifests.push(RenditionManifest {
            name: name.to_string(),
            manifest_url: url.to_string(),
            bitrate,
        });
        self
    }

    pub fn build(self) -> StreamSession {
        StreamSession {
            id: SessionId::new(),
            channel_id: self.channel_id,
            started_at: epoch(),
            ended_at: None,
            renditions: self.manifests.iter().map(|m| m.name.clone()).collect(),
            peak_concurrent: self.peak_concurrent,
            origin_url: "http://origin/live".to_string(),
            playback_url: "http://cdn/live/index.m3u8".to_string(),
            ingest_endpoints: vec!["rtmp://ingest/live".to_string()],
            ingest_job_ids: vec!["job-1".to_string()],
            rendition_manifests: self.manifests,
        }
    }
}

/// Test fixture builder for Recording
pub struct RecordingFixture {
    channel_id: ChannelId,
    duration_seconds: i32,
}

impl RecordingFixture {
    pub fn new() -> Self {
        Self {
            channel_id: ChannelId::new(),
            duration_seconds: 120,
        }
    }

    pub fn build(self) -> Recording {
        Recording {
            id: RecordingId::new(),
            channel_id: self.channel_id,
            session_id: SessionId::new(),
            title: "Recording".to_string(),
            duration_seconds: self.duration_seconds,
            playback_base_url: String::new(),
            renditions: Vec::new(),
            thumbnails: Vec::new(),
            metadata: std::collections::BTreeMap::new(),
            published_at: None,
            created_at: epoch(),
            retain_until: None,
            clips: Vec::new(),
        }
    }
}

/// Test fixture builder for ClipExport
pub struct ClipFixture {
    id: ClipId,
    start_seconds: i32,
    end_seconds: i32,
    storage_object: String,
}

impl ClipFixture {
    pub fn new() -> Self {
        Self {
            id: ClipId::new(),
            start_seconds: 0,
            end_seconds: 10,
            storage_object: String::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = ClipId::from(id);
        self
    }

    pub fn with_range(mut self, start: i32, end: i32) -> Self {
        self.start_seconds = start;
        self.end_seconds = end;
        self
    }

    pub fn with_storage_object(mut self, key: &str) -> Self {
        self.storage_object = key.to_string();
        self
    }

    pub fn build(self) -> ClipExport {
        ClipExport {
            id: self.id,
            recording_id: RecordingId::new(),
            channel_id: ChannelId::new(),
            session_id: SessionId::new(),
            title: "Clip".to_string(),
            start_seconds: self.start_seconds,
            end_seconds: self.end_seconds,
            status: ClipStatus::Pending,
            playback_url: String::new(),
            created_at: epoch(),
            completed_at: None,
            storage_object: self.storage_object,
        }
    }
}
