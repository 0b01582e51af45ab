//! Flat-file repository
//!
//! The whole dataset lives in memory behind one `RwLock` and is mirrored to a
//! single JSON document. Every mutation works on a clone, writes the clone to
//! disk atomically and only then swaps it in, so a failed write leaves both
//! memory and disk untouched.

mod dataset;

pub use dataset::{data_directory, Dataset, DatasetCounts};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::{Repository, RepositoryOptions};
use crate::ingest::HealthStatus;
use crate::models::{
    generate_stream_key, sort_channels, sort_clip_exports, sort_recordings, sort_sessions, Channel,
    ChannelId, ChannelListQuery, ChannelUpdate, ClipExport, ClipExportParams, ClipExportUpdate,
    ClipId, CreateChannelParams, Recording, RecordingId, SessionId, StreamSession,
};
use crate::service::{RecordingLifecycle, StreamLifecycle, StreamStateStore};
use crate::{Error, Result};

pub struct FlatFileRepository {
    path: PathBuf,
    data: RwLock<Dataset>,
    streams: StreamLifecycle,
    recordings: RecordingLifecycle,
    #[cfg(test)]
    persist_faults: parking_lot::Mutex<std::collections::VecDeque<bool>>,
}

impl FlatFileRepository {
    /// Open the dataset at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>, options: &RepositoryOptions) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(data_directory(&path))?;
        let dataset = Dataset::load(&path)?;
        let counts = dataset.counts();
        info!(
            path = %path.display(),
            channels = counts.channels,
            recordings = counts.recordings,
            "Opened flat-file dataset"
        );
        Ok(Self {
            path,
            data: RwLock::new(dataset),
            streams: options.stream_lifecycle(),
            recordings: options.recording_lifecycle(),
            #[cfg(test)]
            persist_faults: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current in-memory dataset
    pub async fn snapshot(&self) -> Dataset {
        self.data.read().await.clone()
    }

    /// Write `next` to disk and hand it back for swapping in
    async fn persist(&self, next: Dataset) -> Result<Dataset> {
        #[cfg(test)]
        if self.persist_faults.lock().pop_front().unwrap_or(false) {
            return Err(Error::Persistence("injected write failure".to_string()));
        }

        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || next.write_atomic(&path).map(|()| next))
            .await
            .map_err(|e| Error::Internal(format!("dataset writer task failed: {e}")))??;
        debug!(path = %self.path.display(), "Dataset persisted");
        Ok(written)
    }

    /// Clone, mutate, persist, swap
    async fn mutate<T, F>(&self, data: &mut RwLockWriteGuard<'_, Dataset>, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Dataset) -> Result<T> + Send,
        T: Send,
    {
        let mut next = (**data).clone();
        let value = apply(&mut next)?;
        **data = self.persist(next).await?;
        Ok(value)
    }

    /// Lazy retention sweep; remote objects go first, then one local commit
    async fn purge_expired(&self, data: &mut RwLockWriteGuard<'_, Dataset>) -> Result<()> {
        let now = self.recordings.now();
        let expired = data.expired_recordings(now);
        if expired.is_empty() {
            return Ok(());
        }

        for id in &expired {
            let recording = data.recording(id)?;
            if let Err(e) = self
                .recordings
                .delete_recording_tree(recording, &data.clips_for(id).collect::<Vec<_>>())
                .await
            {
                warn!(recording_id = %id, error = %e, "Retention sweep aborted, nothing removed");
                return Err(e);
            }
        }

        self.mutate(data, |next| {
            for id in &expired {
                next.remove_recording(id);
            }
            Ok(())
        })
        .await?;
        info!(count = expired.len(), "Purged expired recordings");
        Ok(())
    }

    #[cfg(test)]
    fn fail_persists(&self, plan: &[bool]) {
        self.persist_faults.lock().extend(plan.iter().copied());
    }
}

#[async_trait]
impl StreamStateStore for FlatFileRepository {
    async fn claim_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Channel> {
        let mut data = self.data.write().await;
        self.mutate(&mut data, |next| {
            let channel = next.channel_mut(channel_id)?;
            channel.mark_starting(session_id.clone(), now)?;
            Ok(channel.clone())
        })
        .await
    }

    async fn release_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let owned = data
            .channels
            .get(channel_id)
            .is_some_and(|channel| channel.current_session_id.as_ref() == Some(session_id));
        if !owned {
            return Ok(());
        }
        self.mutate(&mut data, |next| {
            next.channel_mut(channel_id)?.mark_offline(now);
            Ok(())
        })
        .await
    }

    async fn commit_live(&self, session: &StreamSession, now: DateTime<Utc>) -> Result<()> {
        let mut data = self.data.write().await;
        self.mutate(&mut data, |next| {
            let channel = next.channel_mut(&session.channel_id)?;
            if channel.current_session_id.as_ref() != Some(&session.id) {
                return Err(Error::Conflict("channel was released before going live".to_string()));
            }
            channel.mark_live(now);
            next.stream_sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
        .await
    }

    async fn live_session(&self, channel_id: &ChannelId) -> Result<(Channel, StreamSession)> {
        let data = self.data.read().await;
        let channel = data.channel(channel_id)?;
        let session = data.session(channel.live_session_id()?)?;
        Ok((channel.clone(), session.clone()))
    }

    async fn commit_stop(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
        peak_concurrent: i32,
    ) -> Result<StreamSession> {
        let mut data = self.data.write().await;
        let channel = data.channel(channel_id)?.clone();
        if channel.live_session_id()? != session_id {
            return Err(Error::Conflict("channel is not live".to_string()));
        }
        let mut session = data.session(session_id)?.clone();
        session.end(ended_at, peak_concurrent);

        let recording = self
            .recordings
            .create_recording(&session, &channel, ended_at)
            .await?;

        let committed = self
            .mutate(&mut data, |next| {
                next.stream_sessions.insert(session.id.clone(), session.clone());
                next.recordings.insert(recording.id.clone(), recording.clone());
                next.channel_mut(channel_id)?.mark_offline(ended_at);
                Ok(())
            })
            .await;

        if let Err(e) = committed {
            self.recordings.discard_artifacts(&recording).await;
            return Err(e);
        }
        Ok(session)
    }
}

#[async_trait]
impl Repository for FlatFileRepository {
    async fn ping(&self) -> Result<()> {
        tokio::fs::metadata(data_directory(&self.path)).await?;
        Ok(())
    }

    async fn ingest_health(&self) -> Vec<HealthStatus> {
        self.streams.check_health().await
    }

    fn last_ingest_health(&self) -> Option<(Vec<HealthStatus>, DateTime<Utc>)> {
        self.streams.last_health()
    }

    async fn create_channel(&self, params: CreateChannelParams) -> Result<Channel> {
        let channel = Channel::new(params, self.streams.now())?;
        let mut data = self.data.write().await;
        self.mutate(&mut data, |next| {
            next.channels.insert(channel.id.clone(), channel.clone());
            Ok(())
        })
        .await?;
        info!(channel_id = %channel.id, "Channel created");
        Ok(channel)
    }

    async fn update_channel(&self, id: &ChannelId, update: ChannelUpdate) -> Result<Channel> {
        let now = self.streams.now();
        let mut data = self.data.write().await;
        self.mutate(&mut data, |next| {
            let channel = next.channel_mut(id)?;
            channel.apply_update(&update, now)?;
            Ok(channel.clone())
        })
        .await
    }

    async fn rotate_channel_stream_key(&self, id: &ChannelId) -> Result<Channel> {
        let now = self.streams.now();
        let mut data = self.data.write().await;
        let channel = self
            .mutate(&mut data, |next| {
                let channel = next.channel_mut(id)?;
                channel.stream_key = generate_stream_key();
                channel.updated_at = now;
                Ok(channel.clone())
            })
            .await?;
        info!(channel_id = %id, "Stream key rotated");
        Ok(channel)
    }

    async fn delete_channel(&self, id: &ChannelId) -> Result<()> {
        let mut data = self.data.write().await;
        let channel = data.channel(id)?;
        if channel.current_session_id.is_some() {
            return Err(Error::Conflict(
                "cannot delete a channel with an active stream".to_string(),
            ));
        }

        let recording_ids: Vec<RecordingId> = data
            .recordings
            .values()
            .filter(|recording| &recording.channel_id == id)
            .map(|recording| recording.id.clone())
            .collect();
        for recording_id in &recording_ids {
            let recording = data.recording(recording_id)?;
            self.recordings
                .delete_recording_tree(recording, &data.clips_for(recording_id).collect::<Vec<_>>())
                .await?;
        }

        self.mutate(&mut data, |next| {
            for recording_id in &recording_ids {
                next.remove_recording(recording_id);
            }
            next.stream_sessions.retain(|_, session| &session.channel_id != id);
            next.channels.remove(id);
            Ok(())
        })
        .await?;
        info!(channel_id = %id, recordings = recording_ids.len(), "Channel deleted");
        Ok(())
    }

    async fn get_channel(&self, id: &ChannelId) -> Result<Option<Channel>> {
        Ok(self.data.read().await.channels.get(id).cloned())
    }

    async fn get_channel_by_stream_key(&self, stream_key: &str) -> Result<Option<Channel>> {
        let stream_key = stream_key.trim();
        if stream_key.is_empty() {
            return Ok(None);
        }
        let data = self.data.read().await;
        Ok(data
            .channels
            .values()
            .find(|channel| channel.stream_key == stream_key)
            .cloned())
    }

    async fn list_channels(&self, query: ChannelListQuery) -> Result<Vec<Channel>> {
        let needle = query.needle();
        let data = self.data.read().await;
        let mut channels: Vec<Channel> = data
            .channels
            .values()
            .filter(|channel| query.owner_id.as_ref().is_none_or(|owner| &channel.owner_id == owner))
            .filter(|channel| channel.matches_query(&needle))
            .cloned()
            .collect();
        sort_channels(&mut channels);
        Ok(channels)
    }

    async fn start_stream(&self, channel_id: &ChannelId, renditions: &[String]) -> Result<StreamSession> {
        self.streams.start_stream(self, channel_id, renditions).await
    }

    async fn stop_stream(&self, channel_id: &ChannelId, peak_concurrent: i32) -> Result<StreamSession> {
        self.streams.stop_stream(self, channel_id, peak_concurrent).await
    }

    async fn current_stream_session(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>> {
        let data = self.data.read().await;
        let channel = data.channel(channel_id)?;
        Ok(channel
            .current_session_id
            .as_ref()
            .and_then(|session_id| data.stream_sessions.get(session_id))
            .cloned())
    }

    async fn list_stream_sessions(&self, channel_id: &ChannelId) -> Result<Vec<StreamSession>> {
        let data = self.data.read().await;
        data.channel(channel_id)?;
        let mut sessions: Vec<StreamSession> = data
            .stream_sessions
            .values()
            .filter(|session| &session.channel_id == channel_id)
            .cloned()
            .collect();
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    async fn list_recordings(&self, channel_id: &ChannelId, include_unpublished: bool) -> Result<Vec<Recording>> {
        let mut data = self.data.write().await;
        data.channel(channel_id)?;
        self.purge_expired(&mut data).await?;

        let mut recordings: Vec<Recording> = data
            .recordings
            .values()
            .filter(|recording| &recording.channel_id == channel_id)
            .filter(|recording| include_unpublished || recording.is_published())
            .map(|recording| data.hydrate(recording))
            .collect();
        sort_recordings(&mut recordings);
        Ok(recordings)
    }

    async fn get_recording(&self, id: &RecordingId) -> Result<Option<Recording>> {
        let mut data = self.data.write().await;
        self.purge_expired(&mut data).await?;
        Ok(data.recordings.get(id).map(|recording| data.hydrate(recording)))
    }

    async fn publish_recording(&self, id: &RecordingId) -> Result<Recording> {
        let now = self.recordings.now();
        let mut data = self.data.write().await;
        let mut recording = data.recording(id)?.clone();
        if !self.recordings.publish(&mut recording, now) {
            return Ok(data.hydrate(&recording));
        }

        let published = self
            .mutate(&mut data, |next| {
                next.recordings.insert(recording.id.clone(), recording.clone());
                Ok(next.hydrate(&recording))
            })
            .await?;
        info!(recording_id = %id, "Recording published");
        Ok(published)
    }

    async fn delete_recording(&self, id: &RecordingId) -> Result<()> {
        let mut data = self.data.write().await;
        let recording = data.recording(id)?;
        self.recordings
            .delete_recording_tree(recording, &data.clips_for(id).collect::<Vec<_>>())
            .await?;
        self.mutate(&mut data, |next| {
            next.remove_recording(id);
            Ok(())
        })
        .await?;
        info!(recording_id = %id, "Recording deleted");
        Ok(())
    }

    async fn create_clip_export(&self, recording_id: &RecordingId, params: ClipExportParams) -> Result<ClipExport> {
        let now = self.recordings.now();
        let mut data = self.data.write().await;
        let clip = self.recordings.new_clip(data.recording(recording_id)?, &params, now)?;
        self.mutate(&mut data, |next| {
            next.clip_exports.insert(clip.id.clone(), clip.clone());
            Ok(())
        })
        .await?;
        info!(clip_id = %clip.id, %recording_id, "Clip export queued");
        Ok(clip)
    }

    async fn list_clip_exports(&self, recording_id: &RecordingId) -> Result<Vec<ClipExport>> {
        let data = self.data.read().await;
        data.recording(recording_id)?;
        let mut clips: Vec<ClipExport> = data.clips_for(recording_id).cloned().collect();
        sort_clip_exports(&mut clips);
        Ok(clips)
    }

    async fn get_clip_export(&self, id: &ClipId) -> Result<Option<ClipExport>> {
        Ok(self.data.read().await.clip_exports.get(id).cloned())
    }

    async fn update_clip_export(&self, id: &ClipId, update: ClipExportUpdate) -> Result<ClipExport> {
        let mut data = self.data.write().await;
        self.mutate(&mut data, |next| {
            let clip = next
                .clip_exports
                .get_mut(id)
                .ok_or_else(|| Error::not_found("clip export", id))?;
            clip.apply_update(&update);
            Ok(clip.clone())
        })
        .await
    }

    async fn delete_clip_export(&self, id: &ClipId) -> Result<()> {
        let mut data = self.data.write().await;
        self.recordings.delete_clip_artifacts(data.clip(id)?).await?;
        self.mutate(&mut data, |next| {
            next.clip_exports.remove(id);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{BootResult, IngestError, MockIngestController, Rendition};
    use crate::models::{ClipStatus, LiveState, UserId, MANIFEST_METADATA_PREFIX, THUMBNAIL_METADATA_PREFIX};
    use crate::object_storage::{MockObjectStorageClient, ObjectReference, ObjectStorageError};
    use crate::service::RetentionPolicy;
    use crate::test_helpers::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn booting_controller() -> MockIngestController {
        let mut controller = MockIngestController::new();
        controller.expect_boot_stream().returning(|_| {
            Ok(BootResult {
                primary_ingest: Some("rtmp://ingest/live".to_string()),
                origin_url: "http://origin/live".to_string(),
                playback_url: "http://cdn/live/index.m3u8".to_string(),
                renditions: vec![Rendition {
                    name: "720p".to_string(),
                    manifest_url: "http://cdn/live/720p.m3u8".to_string(),
                    bitrate: 4000,
                }],
                job_ids: vec!["j1".to_string()],
                ..Default::default()
            })
        });
        controller.expect_shutdown_stream().returning(|_, _, _| Ok(()));
        controller
    }

    fn uploading_storage() -> MockObjectStorageClient {
        let mut storage = MockObjectStorageClient::new();
        storage.expect_enabled().return_const(true);
        storage.expect_upload().returning(|key, _, _| {
            Ok(ObjectReference {
                key: key.to_string(),
                url: Some(format!("https://cdn.example/{key}")),
            })
        });
        storage
    }

    struct Harness {
        _dir: tempfile::TempDir,
        repo: FlatFileRepository,
        clock: ManualClock,
    }

    fn harness(controller: MockIngestController, storage: MockObjectStorageClient) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let options = RepositoryOptions::new()
            .with_ingest_controller(Arc::new(controller))
            .with_ingest_retry(1, Duration::from_millis(1))
            .with_object_storage(Arc::new(storage))
            .with_retention(RetentionPolicy {
                published: None,
                unpublished: Some(Duration::from_secs(3600)),
            })
            .with_clock(clock.clock());
        let repo = FlatFileRepository::open(dir.path().join("data.json"), &options).unwrap();
        Harness {
            _dir: dir,
            repo,
            clock,
        }
    }

    async fn create_channel(repo: &FlatFileRepository) -> Channel {
        repo.create_channel(CreateChannelParams {
            owner_id: UserId::from("owner"),
            title: "Show".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    fn on_disk(repo: &FlatFileRepository) -> Dataset {
        Dataset::load(repo.path()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_lifecycle_persists_each_step() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;

        let session = h.repo.start_stream(&channel.id, &["720p".to_string()]).await.unwrap();
        let stored = on_disk(&h.repo);
        assert_eq!(stored.channels[&channel.id].live_state, LiveState::Live);
        assert_eq!(stored.stream_sessions[&session.id].ingest_job_ids, vec!["j1"]);

        h.clock.advance(chrono::Duration::seconds(90));
        let ended = h.repo.stop_stream(&channel.id, 10).await.unwrap();
        assert_eq!(ended.peak_concurrent, 10);
        assert!(ended.ended_at.is_some());

        let stored = on_disk(&h.repo);
        assert_eq!(stored.channels[&channel.id].live_state, LiveState::Offline);
        assert!(stored.channels[&channel.id].current_session_id.is_none());
        let recording = stored.recordings.values().next().unwrap();
        assert_eq!(recording.session_id, session.id);
        assert_eq!(recording.duration_seconds, 90);
        assert!(recording.published_at.is_none());
        assert_eq!(
            recording
                .metadata
                .keys()
                .filter(|key| key.starts_with(THUMBNAIL_METADATA_PREFIX))
                .count(),
            1
        );
        assert!(recording.metadata.contains_key(&format!("{MANIFEST_METADATA_PREFIX}720p")));
    }

    #[tokio::test]
    async fn test_start_stream_conflicts_while_live() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();

        let err = h.repo.start_stream(&channel.id, &[]).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "channel already live");
    }

    #[tokio::test]
    async fn test_boot_failure_rolls_back_to_offline() {
        let mut controller = MockIngestController::new();
        controller
            .expect_boot_stream()
            .times(1)
            .returning(|_| Err(IngestError::Rejected("no capacity".to_string())));
        let h = harness(controller, uploading_storage());
        let channel = create_channel(&h.repo).await;

        let err = h.repo.start_stream(&channel.id, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Ingest(_)));

        let stored = h.repo.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(stored.live_state, LiveState::Offline);
        assert!(stored.current_session_id.is_none());
        assert!(on_disk(&h.repo).stream_sessions.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_shuts_down_and_rolls_back() {
        let mut controller = MockIngestController::new();
        controller.expect_boot_stream().returning(|_| {
            Ok(BootResult {
                job_ids: vec!["j1".to_string()],
                ..Default::default()
            })
        });
        controller
            .expect_shutdown_stream()
            .times(1)
            .returning(|_, _, jobs| {
                assert_eq!(jobs, ["j1".to_string()]);
                Ok(())
            });
        let h = harness(controller, uploading_storage());
        let channel = create_channel(&h.repo).await;

        // claim succeeds, commit_live fails, release succeeds
        h.repo.fail_persists(&[false, true]);
        let err = h.repo.start_stream(&channel.id, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));

        let stored = h.repo.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(stored.live_state, LiveState::Offline);
        assert_eq!(on_disk(&h.repo).channels[&channel.id].live_state, LiveState::Offline);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_and_disk_unchanged() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        let before = on_disk(&h.repo);

        h.repo.fail_persists(&[true]);
        let err = h
            .repo
            .update_channel(
                &channel.id,
                ChannelUpdate {
                    title: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(h.repo.snapshot().await, before);
        assert_eq!(on_disk(&h.repo), before);
    }

    #[tokio::test]
    async fn test_stop_shutdown_failure_keeps_channel_live() {
        let mut controller = MockIngestController::new();
        controller.expect_boot_stream().returning(|_| Ok(BootResult::default()));
        controller
            .expect_shutdown_stream()
            .returning(|_, _, _| Err(IngestError::Rejected("busy".to_string())));
        let h = harness(controller, uploading_storage());
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();

        assert!(h.repo.stop_stream(&channel.id, 3).await.is_err());
        let stored = h.repo.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(stored.live_state, LiveState::Live);
        assert!(on_disk(&h.repo).recordings.is_empty());
    }

    #[tokio::test]
    async fn test_stop_commit_failure_keeps_channel_live_and_discards_artifacts() {
        let mut storage = uploading_storage();
        storage
            .expect_delete()
            .withf(|key: &str| key.contains("/manifests/720p.json") || key.contains("/thumbnails/"))
            .times(2)
            .returning(|_| Ok(()));
        let h = harness(booting_controller(), storage);
        let channel = create_channel(&h.repo).await;
        let session = h.repo.start_stream(&channel.id, &["720p".to_string()]).await.unwrap();

        h.repo.fail_persists(&[true]);
        let err = h.repo.stop_stream(&channel.id, 5).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));

        for dataset in [h.repo.snapshot().await, on_disk(&h.repo)] {
            let stored = &dataset.channels[&channel.id];
            assert_eq!(stored.live_state, LiveState::Live);
            assert_eq!(stored.current_session_id.as_ref(), Some(&session.id));
            assert!(dataset.stream_sessions[&session.id].ended_at.is_none());
            assert!(dataset.recordings.is_empty());
        }

        let ended = h.repo.stop_stream(&channel.id, 5).await.unwrap();
        assert_eq!(ended.id, session.id);
        assert_eq!(on_disk(&h.repo).recordings.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_stream_requires_live_channel() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        let err = h.repo.stop_stream(&channel.id, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "channel is not live");

        let err = h.repo.stop_stream(&ChannelId::from("missing"), 0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_purge_removes_expired_recording_and_remote_objects() {
        let mut storage = uploading_storage();
        storage.expect_delete().times(3).returning(|_| Ok(()));
        let h = harness(booting_controller(), storage);
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();
        h.repo.stop_stream(&channel.id, 1).await.unwrap();

        let recordings = h.repo.list_recordings(&channel.id, true).await.unwrap();
        assert_eq!(recordings.len(), 1);
        let recording_id = recordings[0].id.clone();
        let clip = h
            .repo
            .create_clip_export(
                &recording_id,
                ClipExportParams {
                    title: "Best bit".to_string(),
                    start_seconds: 0,
                    end_seconds: 0,
                },
            )
            .await;
        assert!(clip.unwrap_err().is_invalid_input());

        let clip = h
            .repo
            .create_clip_export(
                &recording_id,
                ClipExportParams {
                    title: "Best bit".to_string(),
                    start_seconds: 0,
                    end_seconds: 5,
                },
            )
            .await
            .unwrap();
        h.repo
            .update_clip_export(
                &clip.id,
                ClipExportUpdate {
                    status: Some(ClipStatus::Ready),
                    storage_object: Some("clips/c1.mp4".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::seconds(3601));
        assert!(h.repo.list_recordings(&channel.id, true).await.unwrap().is_empty());
        assert!(h.repo.get_clip_export(&clip.id).await.unwrap().is_none());
        let stored = on_disk(&h.repo);
        assert!(stored.recordings.is_empty());
        assert!(stored.clip_exports.is_empty());
    }

    #[tokio::test]
    async fn test_purge_delete_failure_keeps_local_state() {
        let mut storage = uploading_storage();
        storage.expect_delete().returning(|key| {
            Err(ObjectStorageError::Rejected(format!("cannot delete {key}")))
        });
        let h = harness(booting_controller(), storage);
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();
        h.repo.stop_stream(&channel.id, 1).await.unwrap();
        let before = on_disk(&h.repo);

        h.clock.advance(chrono::Duration::hours(2));
        assert!(h.repo.list_recordings(&channel.id, true).await.is_err());
        assert_eq!(h.repo.snapshot().await, before);
        assert_eq!(on_disk(&h.repo), before);
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();
        h.repo.stop_stream(&channel.id, 1).await.unwrap();
        let recording = h.repo.list_recordings(&channel.id, true).await.unwrap().remove(0);
        assert!(h.repo.list_recordings(&channel.id, false).await.unwrap().is_empty());

        let first = h.repo.publish_recording(&recording.id).await.unwrap();
        h.clock.advance(chrono::Duration::seconds(30));
        let second = h.repo.publish_recording(&recording.id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.retain_until.is_none());
        assert_eq!(h.repo.list_recordings(&channel.id, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_channel_refused_while_live() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &[]).await.unwrap();

        let err = h.repo.delete_channel(&channel.id).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot delete a channel with an active stream");
    }

    #[tokio::test]
    async fn test_reopen_restores_full_dataset() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;
        h.repo.start_stream(&channel.id, &["720p".to_string()]).await.unwrap();
        h.clock.advance(chrono::Duration::seconds(90));
        h.repo.stop_stream(&channel.id, 12).await.unwrap();

        let recording = h.repo.list_recordings(&channel.id, true).await.unwrap().remove(0);
        let clip = h
            .repo
            .create_clip_export(
                &recording.id,
                ClipExportParams {
                    title: "Opening".to_string(),
                    start_seconds: 5,
                    end_seconds: 30,
                },
            )
            .await
            .unwrap();
        h.repo
            .update_clip_export(
                &clip.id,
                ClipExportUpdate {
                    status: Some(ClipStatus::Ready),
                    storage_object: Some("clips/opening.mp4".to_string()),
                    completed_at: Some(h.repo.recordings.now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.clock.advance(chrono::Duration::seconds(10));
        h.repo.start_stream(&channel.id, &["720p".to_string()]).await.unwrap();

        let before = h.repo.snapshot().await;
        assert_eq!(
            before.counts(),
            DatasetCounts {
                channels: 1,
                stream_sessions: 2,
                recordings: 1,
                clip_exports: 1,
            }
        );
        let stored = &before.recordings[&recording.id];
        assert_eq!(stored.thumbnails.len(), 1);
        assert_eq!(stored.renditions.len(), 1);
        assert!(!stored.artifact_refs().is_empty());

        let reopened = FlatFileRepository::open(h.repo.path(), &RepositoryOptions::new()).unwrap();
        assert_eq!(reopened.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_reopen_reads_persisted_dataset() {
        let h = harness(booting_controller(), uploading_storage());
        let channel = create_channel(&h.repo).await;

        let reopened = FlatFileRepository::open(h.repo.path(), &RepositoryOptions::new()).unwrap();
        let found = reopened
            .get_channel_by_stream_key(&format!(" {} ", channel.stream_key))
            .await
            .unwrap();
        assert_eq!(found, Some(channel));
        assert!(reopened.get_channel_by_stream_key("  ").await.unwrap().is_none());
    }
}
