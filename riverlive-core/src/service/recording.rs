use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::Clock;
use crate::config::RetentionConfig;
use crate::models::{
    ArtifactKind, Channel, ClipExport, ClipExportParams, ClipId, ClipStatus, Recording,
    RecordingId, RecordingRendition, RecordingThumbnail, StreamSession, ThumbnailId,
};
use crate::object_storage::{
    build_object_key, normalize_object_component, ObjectReference, ObjectStorageClient,
    ObjectStorageError,
};
use crate::resilience::with_timeout;
use crate::{Error, Result};

const JSON_CONTENT_TYPE: &str = "application/json";

/// How long recordings are kept before the lazy sweep purges them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// `None` keeps published recordings forever
    pub published: Option<Duration>,
    /// `None` keeps unpublished recordings until they are published
    pub unpublished: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        let window = |seconds: u64| (seconds > 0).then(|| Duration::from_secs(seconds));
        Self {
            published: window(config.published_seconds),
            unpublished: window(config.unpublished_seconds),
        }
    }
}

fn deadline(from: DateTime<Utc>, window: Option<Duration>) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(window?).ok()?;
    from.checked_add_signed(window)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDescriptor<'a> {
    recording_id: &'a RecordingId,
    session_id: &'a str,
    name: &'a str,
    source: &'a str,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bitrate: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailDescriptor<'a> {
    recording_id: &'a RecordingId,
    session_id: &'a str,
    created_at: DateTime<Utc>,
}

/// Builds recordings from ended sessions and owns their remote artifacts
pub struct RecordingLifecycle {
    storage: Arc<dyn ObjectStorageClient>,
    retention: RetentionPolicy,
    storage_timeout: Duration,
    clock: Clock,
}

impl RecordingLifecycle {
    pub fn new(
        storage: Arc<dyn ObjectStorageClient>,
        retention: RetentionPolicy,
        storage_timeout: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            storage,
            retention,
            storage_timeout,
            clock,
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Materialize the recording for a session that ended at `ended_at`
    ///
    /// Uploads manifest and thumbnail descriptors when object storage is
    /// enabled. Any upload failure fails the whole call.
    pub async fn create_recording(
        &self,
        session: &StreamSession,
        channel: &Channel,
        ended_at: DateTime<Utc>,
    ) -> Result<Recording> {
        let elapsed = (ended_at - session.started_at).num_microseconds().unwrap_or(0);
        let duration_seconds = i32::try_from((elapsed + 500_000).div_euclid(1_000_000).max(0))
            .unwrap_or(i32::MAX);

        let title = match channel.title.trim() {
            "" => format!("Recording {}", session.id),
            title => title.to_string(),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("channelId".to_string(), channel.id.to_string());
        metadata.insert("sessionId".to_string(), session.id.to_string());
        metadata.insert("startedAt".to_string(), session.started_at.to_rfc3339());
        metadata.insert("endedAt".to_string(), ended_at.to_rfc3339());
        metadata.insert("renditions".to_string(), session.rendition_manifests.len().to_string());
        if session.peak_concurrent > 0 {
            metadata.insert("peakConcurrent".to_string(), session.peak_concurrent.to_string());
        }

        let mut recording = Recording {
            id: RecordingId::new(),
            channel_id: channel.id.clone(),
            session_id: session.id.clone(),
            title,
            duration_seconds,
            playback_base_url: session.playback_url.clone(),
            renditions: session
                .rendition_manifests
                .iter()
                .map(|manifest| RecordingRendition {
                    name: manifest.name.clone(),
                    manifest_url: manifest.manifest_url.clone(),
                    bitrate: manifest.bitrate,
                })
                .collect(),
            thumbnails: Vec::new(),
            metadata,
            published_at: None,
            created_at: ended_at,
            retain_until: deadline(ended_at, self.retention.unpublished),
            clips: Vec::new(),
        };

        self.populate_artifacts(&mut recording, session).await?;

        info!(
            recording_id = %recording.id,
            session_id = %session.id,
            duration_seconds,
            "Recording created"
        );
        Ok(recording)
    }

    /// Upload manifest and thumbnail descriptors and record their keys
    ///
    /// On failure the objects uploaded so far are deleted again.
    pub async fn populate_artifacts(&self, recording: &mut Recording, session: &StreamSession) -> Result<()> {
        if !self.storage.enabled() {
            return Ok(());
        }
        if let Err(e) = self.upload_artifacts(recording, session).await {
            self.discard_artifacts(recording).await;
            return Err(e);
        }
        Ok(())
    }

    async fn upload_artifacts(&self, recording: &mut Recording, session: &StreamSession) -> Result<()> {
        for idx in 0..recording.renditions.len() {
            let rendition = &recording.renditions[idx];
            let slug = normalize_object_component(&rendition.name);
            let descriptor = ManifestDescriptor {
                recording_id: &recording.id,
                session_id: session.id.as_str(),
                name: &rendition.name,
                source: &rendition.manifest_url,
                created_at: recording.created_at,
                bitrate: (rendition.bitrate > 0).then_some(rendition.bitrate),
            };
            let body = serde_json::to_vec(&descriptor)?;
            let key = build_object_key(&[
                "recordings",
                recording.id.as_str(),
                "manifests",
                &format!("{slug}.json"),
            ]);

            let reference = self.upload(&key, body).await?;
            if !reference.key.is_empty() {
                recording.record_artifact(ArtifactKind::Manifest, &slug, &reference.key);
            }
            if let Some(url) = reference.url.filter(|url| !url.is_empty()) {
                recording.renditions[idx].manifest_url = url;
            }
        }

        let thumbnail_id = ThumbnailId::new();
        let descriptor = ThumbnailDescriptor {
            recording_id: &recording.id,
            session_id: session.id.as_str(),
            created_at: recording.created_at,
        };
        let body = serde_json::to_vec(&descriptor)?;
        let key = build_object_key(&[
            "recordings",
            recording.id.as_str(),
            "thumbnails",
            &format!("{thumbnail_id}.json"),
        ]);
        let reference = self.upload(&key, body).await?;
        if !reference.key.is_empty() {
            recording.record_artifact(ArtifactKind::Thumbnail, thumbnail_id.as_str(), &reference.key);
        }
        recording.thumbnails.push(RecordingThumbnail {
            id: thumbnail_id,
            recording_id: recording.id.clone(),
            url: reference.url.unwrap_or_default(),
            created_at: recording.created_at,
        });
        Ok(())
    }

    async fn upload(&self, key: &str, body: Vec<u8>) -> Result<ObjectReference> {
        let reference = with_timeout(
            self.storage_timeout,
            self.storage.upload(key, JSON_CONTENT_TYPE, Bytes::from(body)),
            || ObjectStorageError::Timeout {
                operation: "upload",
                key: key.to_string(),
                timeout: self.storage_timeout,
            },
        )
        .await?;
        debug!(key, stored_key = %reference.key, "Uploaded recording artifact");
        Ok(reference)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        with_timeout(self.storage_timeout, self.storage.delete(key), || {
            ObjectStorageError::Timeout {
                operation: "delete",
                key: key.to_string(),
                timeout: self.storage_timeout,
            }
        })
        .await?;
        debug!(key, "Deleted remote object");
        Ok(())
    }

    /// Delete every remote object the recording's metadata references
    pub async fn delete_recording_artifacts(&self, recording: &Recording) -> Result<()> {
        for artifact in recording.artifact_refs() {
            self.delete_object(&artifact.key).await?;
        }
        Ok(())
    }

    /// Delete the clip's rendered object, if any
    pub async fn delete_clip_artifacts(&self, clip: &ClipExport) -> Result<()> {
        let key = clip.storage_object.trim();
        if key.is_empty() {
            return Ok(());
        }
        self.delete_object(key).await
    }

    /// Remote cleanup for a recording and its clips, in deletion order
    pub async fn delete_recording_tree(&self, recording: &Recording, clips: &[&ClipExport]) -> Result<()> {
        self.delete_recording_artifacts(recording).await?;
        for clip in clips {
            self.delete_clip_artifacts(clip).await?;
        }
        Ok(())
    }

    /// Best-effort removal of artifacts for a recording that was never stored
    pub async fn discard_artifacts(&self, recording: &Recording) {
        if let Err(e) = self.delete_recording_artifacts(recording).await {
            error!(
                recording_id = %recording.id,
                error = %e,
                "Failed to remove artifacts of unsaved recording"
            );
        }
    }

    /// Mark published; false if it already was
    pub fn publish(&self, recording: &mut Recording, now: DateTime<Utc>) -> bool {
        if recording.is_published() {
            return false;
        }
        recording.published_at = Some(now);
        recording.retain_until = deadline(now, self.retention.published);
        true
    }

    /// Validate clip bounds against the recording and build a pending clip
    pub fn new_clip(
        &self,
        recording: &Recording,
        params: &ClipExportParams,
        now: DateTime<Utc>,
    ) -> Result<ClipExport> {
        if params.end_seconds <= params.start_seconds {
            return Err(Error::InvalidInput(
                "end_seconds must be greater than start_seconds".to_string(),
            ));
        }
        if params.start_seconds < 0 {
            return Err(Error::InvalidInput("start_seconds must be non-negative".to_string()));
        }
        if recording.duration_seconds > 0 && params.end_seconds > recording.duration_seconds {
            return Err(Error::InvalidInput("clip exceeds recording duration".to_string()));
        }
        Ok(ClipExport {
            id: ClipId::new(),
            recording_id: recording.id.clone(),
            channel_id: recording.channel_id.clone(),
            session_id: recording.session_id.clone(),
            title: params.title.trim().to_string(),
            start_seconds: params.start_seconds,
            end_seconds: params.end_seconds,
            status: ClipStatus::Pending,
            playback_url: String::new(),
            created_at: now,
            completed_at: None,
            storage_object: String::new(),
        })
    }
}
