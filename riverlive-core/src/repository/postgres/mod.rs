//! Postgres repository
//!
//! Every mutation runs in one transaction and locks the rows it reads with
//! `FOR UPDATE`, so concurrent callers on the same channel or recording are
//! serialized by the database.

mod channel;
mod clip;
mod recording;
mod session;

pub use channel::ChannelRepository;
pub use clip::ClipRepository;
pub use recording::RecordingRepository;
pub use session::SessionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{error, info, warn};

use super::{Repository, RepositoryOptions};
use crate::ingest::HealthStatus;
use crate::models::{
    generate_stream_key, summarize_clips, Channel, ChannelId, ChannelListQuery, ChannelUpdate,
    ClipExport, ClipExportParams, ClipExportUpdate, ClipId, CreateChannelParams, Recording,
    RecordingId, SessionId, StreamSession,
};
use crate::service::{RecordingLifecycle, StreamLifecycle, StreamStateStore};
use crate::transaction::UnitOfWork;
use crate::{Error, Result};

pub struct PostgresRepository {
    pool: PgPool,
    channels: ChannelRepository,
    sessions: SessionRepository,
    recordings: RecordingRepository,
    clips: ClipRepository,
    streams: StreamLifecycle,
    lifecycle: RecordingLifecycle,
}

impl PostgresRepository {
    #[must_use]
    pub fn new(pool: PgPool, options: &RepositoryOptions) -> Self {
        Self {
            channels: ChannelRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool.clone()),
            recordings: RecordingRepository::new(pool.clone()),
            clips: ClipRepository::new(pool.clone()),
            pool,
            streams: options.stream_lifecycle(),
            lifecycle: options.recording_lifecycle(),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_channel(&self, uow: &mut UnitOfWork, id: &ChannelId) -> Result<Channel> {
        self.channels
            .get_for_update_with_executor(id, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("channel", id))
    }

    async fn require_channel(&self, id: &ChannelId) -> Result<Channel> {
        self.channels
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("channel", id))
    }

    /// Attach clip summaries to each recording
    async fn hydrate(&self, mut recordings: Vec<Recording>) -> Result<Vec<Recording>> {
        let ids: Vec<RecordingId> = recordings.iter().map(|recording| recording.id.clone()).collect();
        let mut by_recording: HashMap<RecordingId, Vec<ClipExport>> = HashMap::new();
        for clip in self.clips.list_by_recordings(&ids).await? {
            by_recording.entry(clip.recording_id.clone()).or_default().push(clip);
        }
        for recording in &mut recordings {
            if let Some(clips) = by_recording.get(&recording.id) {
                recording.clips = summarize_clips(clips);
            }
        }
        Ok(recordings)
    }

    async fn hydrate_one(&self, recording: Recording) -> Result<Recording> {
        let mut hydrated = self.hydrate(vec![recording]).await?;
        hydrated
            .pop()
            .ok_or_else(|| Error::Internal("hydrated recording went missing".to_string()))
    }

    /// Remote cleanup for `recordings`, then delete them and their clips in `uow`
    async fn delete_recordings(&self, uow: &mut UnitOfWork, recordings: &[Recording]) -> Result<()> {
        let ids: Vec<RecordingId> = recordings.iter().map(|recording| recording.id.clone()).collect();
        let clips = self
            .clips
            .list_by_recordings_with_executor(&ids, uow.conn()?)
            .await?;
        for recording in recordings {
            let owned: Vec<&ClipExport> = clips
                .iter()
                .filter(|clip| clip.recording_id == recording.id)
                .collect();
            self.lifecycle.delete_recording_tree(recording, &owned).await?;
        }
        self.clips
            .delete_by_recordings_with_executor(&ids, uow.conn()?)
            .await?;
        self.recordings
            .delete_many_with_executor(&ids, uow.conn()?)
            .await?;
        Ok(())
    }

    /// Lazy retention sweep; any remote failure rolls the whole sweep back
    async fn purge_expired(&self) -> Result<()> {
        let now = self.lifecycle.now();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let expired = self
            .recordings
            .expired_for_update_with_executor(now, uow.conn()?)
            .await?;
        if expired.is_empty() {
            return uow.commit().await;
        }

        if let Err(e) = self.delete_recordings(&mut uow, &expired).await {
            warn!(count = expired.len(), error = %e, "Retention sweep aborted, nothing removed");
            if let Err(rollback) = uow.rollback().await {
                error!(error = %rollback, "Failed to roll back retention sweep");
            }
            return Err(e);
        }
        uow.commit().await?;
        info!(count = expired.len(), "Purged expired recordings");
        Ok(())
    }

    async fn finish_stop(
        &self,
        mut uow: UnitOfWork,
        mut channel: Channel,
        session: &StreamSession,
        recording: &Recording,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        self.sessions.save_end_with_executor(session, uow.conn()?).await?;
        self.recordings.insert_with_executor(recording, uow.conn()?).await?;
        channel.mark_offline(ended_at);
        self.channels.save_with_executor(&channel, uow.conn()?).await?;
        uow.commit().await
    }
}

#[async_trait]
impl StreamStateStore for PostgresRepository {
    async fn claim_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Channel> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut channel = self.lock_channel(&mut uow, channel_id).await?;
        channel.mark_starting(session_id.clone(), now)?;
        self.channels.save_with_executor(&channel, uow.conn()?).await?;
        uow.commit().await?;
        Ok(channel)
    }

    async fn release_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let Some(mut channel) = self
            .channels
            .get_for_update_with_executor(channel_id, uow.conn()?)
            .await?
        else {
            return uow.commit().await;
        };
        if channel.current_session_id.as_ref() == Some(session_id) {
            channel.mark_offline(now);
            self.channels.save_with_executor(&channel, uow.conn()?).await?;
        }
        uow.commit().await
    }

    async fn commit_live(&self, session: &StreamSession, now: DateTime<Utc>) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut channel = self.lock_channel(&mut uow, &session.channel_id).await?;
        if channel.current_session_id.as_ref() != Some(&session.id) {
            return Err(Error::Conflict("channel was released before going live".to_string()));
        }
        self.sessions.insert_with_executor(session, uow.conn()?).await?;
        channel.mark_live(now);
        self.channels.save_with_executor(&channel, uow.conn()?).await?;
        uow.commit().await
    }

    async fn live_session(&self, channel_id: &ChannelId) -> Result<(Channel, StreamSession)> {
        let channel = self.require_channel(channel_id).await?;
        let session_id = channel.live_session_id()?;
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found("stream session", session_id))?;
        Ok((channel, session))
    }

    async fn commit_stop(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
        peak_concurrent: i32,
    ) -> Result<StreamSession> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let channel = self.lock_channel(&mut uow, channel_id).await?;
        if channel.live_session_id()? != session_id {
            return Err(Error::Conflict("channel is not live".to_string()));
        }
        let mut session = self
            .sessions
            .get_with_executor(session_id, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("stream session", session_id))?;
        session.end(ended_at, peak_concurrent);

        let recording = self
            .lifecycle
            .create_recording(&session, &channel, ended_at)
            .await?;

        if let Err(e) = self
            .finish_stop(uow, channel, &session, &recording, ended_at)
            .await
        {
            self.lifecycle.discard_artifacts(&recording).await;
            return Err(e);
        }
        Ok(session)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
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
        self.channels.insert_with_executor(&channel, &self.pool).await?;
        info!(channel_id = %channel.id, "Channel created");
        Ok(channel)
    }

    async fn update_channel(&self, id: &ChannelId, update: ChannelUpdate) -> Result<Channel> {
        let now = self.streams.now();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut channel = self.lock_channel(&mut uow, id).await?;
        channel.apply_update(&update, now)?;
        self.channels.save_with_executor(&channel, uow.conn()?).await?;
        uow.commit().await?;
        Ok(channel)
    }

    async fn rotate_channel_stream_key(&self, id: &ChannelId) -> Result<Channel> {
        let now = self.streams.now();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut channel = self.lock_channel(&mut uow, id).await?;
        channel.stream_key = generate_stream_key();
        channel.updated_at = now;
        self.channels.save_with_executor(&channel, uow.conn()?).await?;
        uow.commit().await?;
        info!(channel_id = %id, "Stream key rotated");
        Ok(channel)
    }

    async fn delete_channel(&self, id: &ChannelId) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let channel = self.lock_channel(&mut uow, id).await?;
        if channel.current_session_id.is_some() {
            return Err(Error::Conflict(
                "cannot delete a channel with an active stream".to_string(),
            ));
        }
        let recordings = self
            .recordings
            .list_by_channel_for_update_with_executor(id, uow.conn()?)
            .await?;
        self.delete_recordings(&mut uow, &recordings).await?;
        self.channels.delete_with_executor(id, uow.conn()?).await?;
        uow.commit().await?;
        info!(channel_id = %id, recordings = recordings.len(), "Channel deleted");
        Ok(())
    }

    async fn get_channel(&self, id: &ChannelId) -> Result<Option<Channel>> {
        self.channels.get(id).await
    }

    async fn get_channel_by_stream_key(&self, stream_key: &str) -> Result<Option<Channel>> {
        let stream_key = stream_key.trim();
        if stream_key.is_empty() {
            return Ok(None);
        }
        self.channels.get_by_stream_key(stream_key).await
    }

    async fn list_channels(&self, query: ChannelListQuery) -> Result<Vec<Channel>> {
        self.channels.list(&query).await
    }

    async fn start_stream(&self, channel_id: &ChannelId, renditions: &[String]) -> Result<StreamSession> {
        self.streams.start_stream(self, channel_id, renditions).await
    }

    async fn stop_stream(&self, channel_id: &ChannelId, peak_concurrent: i32) -> Result<StreamSession> {
        self.streams.stop_stream(self, channel_id, peak_concurrent).await
    }

    async fn current_stream_session(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>> {
        let channel = self.require_channel(channel_id).await?;
        match &channel.current_session_id {
            Some(session_id) => self.sessions.get(session_id).await,
            None => Ok(None),
        }
    }

    async fn list_stream_sessions(&self, channel_id: &ChannelId) -> Result<Vec<StreamSession>> {
        self.require_channel(channel_id).await?;
        self.sessions.list_by_channel(channel_id).await
    }

    async fn list_recordings(&self, channel_id: &ChannelId, include_unpublished: bool) -> Result<Vec<Recording>> {
        self.require_channel(channel_id).await?;
        self.purge_expired().await?;
        let recordings = self
            .recordings
            .list_by_channel(channel_id, include_unpublished)
            .await?;
        self.hydrate(recordings).await
    }

    async fn get_recording(&self, id: &RecordingId) -> Result<Option<Recording>> {
        self.purge_expired().await?;
        match self.recordings.get(id).await? {
            Some(recording) => Ok(Some(self.hydrate_one(recording).await?)),
            None => Ok(None),
        }
    }

    async fn publish_recording(&self, id: &RecordingId) -> Result<Recording> {
        let now = self.lifecycle.now();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut recording = self
            .recordings
            .get_locked_with_executor(id, false, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("recording", id))?;
        if self.lifecycle.publish(&mut recording, now) {
            self.recordings
                .save_publication_with_executor(&recording, uow.conn()?)
                .await?;
            uow.commit().await?;
            info!(recording_id = %id, "Recording published");
        } else {
            uow.commit().await?;
        }
        self.hydrate_one(recording).await
    }

    async fn delete_recording(&self, id: &RecordingId) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let recording = self
            .recordings
            .get_locked_with_executor(id, false, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("recording", id))?;
        self.delete_recordings(&mut uow, std::slice::from_ref(&recording)).await?;
        uow.commit().await?;
        info!(recording_id = %id, "Recording deleted");
        Ok(())
    }

    async fn create_clip_export(&self, recording_id: &RecordingId, params: ClipExportParams) -> Result<ClipExport> {
        let now = self.lifecycle.now();
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let recording = self
            .recordings
            .get_locked_with_executor(recording_id, true, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("recording", recording_id))?;
        let clip = self.lifecycle.new_clip(&recording, &params, now)?;
        self.clips.insert_with_executor(&clip, uow.conn()?).await?;
        uow.commit().await?;
        info!(clip_id = %clip.id, %recording_id, "Clip export queued");
        Ok(clip)
    }

    async fn list_clip_exports(&self, recording_id: &RecordingId) -> Result<Vec<ClipExport>> {
        if self.recordings.get(recording_id).await?.is_none() {
            return Err(Error::not_found("recording", recording_id));
        }
        self.clips.list_by_recording(recording_id).await
    }

    async fn get_clip_export(&self, id: &ClipId) -> Result<Option<ClipExport>> {
        self.clips.get(id).await
    }

    async fn update_clip_export(&self, id: &ClipId, update: ClipExportUpdate) -> Result<ClipExport> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let mut clip = self
            .clips
            .get_for_update_with_executor(id, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("clip export", id))?;
        clip.apply_update(&update);
        self.clips.save_with_executor(&clip, uow.conn()?).await?;
        uow.commit().await?;
        Ok(clip)
    }

    async fn delete_clip_export(&self, id: &ClipId) -> Result<()> {
        let mut uow = UnitOfWork::begin(&self.pool).await?;
        let clip = self
            .clips
            .get_for_update_with_executor(id, uow.conn()?)
            .await?
            .ok_or_else(|| Error::not_found("clip export", id))?;
        self.lifecycle.delete_clip_artifacts(&clip).await?;
        self.clips.delete_with_executor(id, uow.conn()?).await?;
        uow.commit().await
    }
}
