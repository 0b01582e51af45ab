//! Repository contract and its two backends
//!
//! [`FlatFileRepository`] keeps the dataset in memory and mirrors it to one
//! JSON file; [`PostgresRepository`] runs every operation in a transaction.
//! Both take the same [`RepositoryOptions`] and must be indistinguishable to
//! callers.

pub mod flat_file;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::{HealthStatus, IngestController, NoopIngestController};
use crate::models::{
    Channel, ChannelId, ChannelListQuery, ChannelUpdate, ClipExport, ClipExportParams,
    ClipExportUpdate, ClipId, CreateChannelParams, Recording, RecordingId, StreamSession,
};
use crate::object_storage::{NoopObjectStorage, ObjectStorageClient};
use crate::resilience::{retry::IngestRetryPolicy, timeout::TimeoutConfig};
use crate::service::{system_clock, Clock, RecordingLifecycle, RetentionPolicy, StreamLifecycle};
use crate::Result;

pub use flat_file::FlatFileRepository;
pub use postgres::PostgresRepository;

/// Persistence contract shared by both backends
#[async_trait]
pub trait Repository: Send + Sync {
    /// Verify the backing store is reachable
    async fn ping(&self) -> Result<()>;

    /// Query the ingest controller and record the snapshot
    async fn ingest_health(&self) -> Vec<HealthStatus>;

    /// Last recorded ingest health and when it was taken
    fn last_ingest_health(&self) -> Option<(Vec<HealthStatus>, DateTime<Utc>)>;

    async fn create_channel(&self, params: CreateChannelParams) -> Result<Channel>;

    async fn update_channel(&self, id: &ChannelId, update: ChannelUpdate) -> Result<Channel>;

    async fn rotate_channel_stream_key(&self, id: &ChannelId) -> Result<Channel>;

    /// Delete a channel with its sessions, recordings and clips.
    /// Refused while a stream is active.
    async fn delete_channel(&self, id: &ChannelId) -> Result<()>;

    async fn get_channel(&self, id: &ChannelId) -> Result<Option<Channel>>;

    async fn get_channel_by_stream_key(&self, stream_key: &str) -> Result<Option<Channel>>;

    /// Live channels first, then oldest first
    async fn list_channels(&self, query: ChannelListQuery) -> Result<Vec<Channel>>;

    async fn start_stream(&self, channel_id: &ChannelId, renditions: &[String]) -> Result<StreamSession>;

    async fn stop_stream(&self, channel_id: &ChannelId, peak_concurrent: i32) -> Result<StreamSession>;

    async fn current_stream_session(&self, channel_id: &ChannelId) -> Result<Option<StreamSession>>;

    /// Newest first
    async fn list_stream_sessions(&self, channel_id: &ChannelId) -> Result<Vec<StreamSession>>;

    /// Newest first; purges expired recordings before reading
    async fn list_recordings(&self, channel_id: &ChannelId, include_unpublished: bool) -> Result<Vec<Recording>>;

    /// Purges expired recordings before reading
    async fn get_recording(&self, id: &RecordingId) -> Result<Option<Recording>>;

    async fn publish_recording(&self, id: &RecordingId) -> Result<Recording>;

    async fn delete_recording(&self, id: &RecordingId) -> Result<()>;

    async fn create_clip_export(&self, recording_id: &RecordingId, params: ClipExportParams) -> Result<ClipExport>;

    /// Newest first
    async fn list_clip_exports(&self, recording_id: &RecordingId) -> Result<Vec<ClipExport>>;

    async fn get_clip_export(&self, id: &ClipId) -> Result<Option<ClipExport>>;

    async fn update_clip_export(&self, id: &ClipId, update: ClipExportUpdate) -> Result<ClipExport>;

    async fn delete_clip_export(&self, id: &ClipId) -> Result<()>;
}

/// Collaborators and policies shared by both backends
#[derive(Clone)]
pub struct RepositoryOptions {
    pub ingest_controller: Arc<dyn IngestController>,
    pub ingest_retry: IngestRetryPolicy,
    pub timeouts: TimeoutConfig,
    pub object_storage: Arc<dyn ObjectStorageClient>,
    pub retention: RetentionPolicy,
    pub clock: Clock,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            ingest_controller: Arc::new(NoopIngestController),
            ingest_retry: IngestRetryPolicy::default(),
            timeouts: TimeoutConfig::default(),
            object_storage: Arc::new(NoopObjectStorage),
            retention: RetentionPolicy::default(),
            clock: system_clock(),
        }
    }
}

impl RepositoryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ingest_controller(mut self, controller: Arc<dyn IngestController>) -> Self {
        self.ingest_controller = controller;
        self
    }

    #[must_use]
    pub fn with_ingest_retry(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.ingest_retry = IngestRetryPolicy::new(max_attempts, interval);
        self
    }

    #[must_use]
    pub fn with_ingest_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts = self.timeouts.with_ingest_timeout(timeout);
        self
    }

    #[must_use]
    pub fn with_object_storage(mut self, storage: Arc<dyn ObjectStorageClient>) -> Self {
        self.object_storage = storage;
        self
    }

    #[must_use]
    pub fn with_object_storage_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts = self.timeouts.with_object_storage_timeout(timeout);
        self
    }

    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn stream_lifecycle(&self) -> StreamLifecycle {
        StreamLifecycle::new(
            self.ingest_controller.clone(),
            self.ingest_retry,
            self.timeouts.ingest,
            self.clock.clone(),
        )
    }

    pub(crate) fn recording_lifecycle(&self) -> RecordingLifecycle {
        RecordingLifecycle::new(
            self.object_storage.clone(),
            self.retention,
            self.timeouts.object_storage,
            self.clock.clone(),
        )
    }
}
