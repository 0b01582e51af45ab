use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::Clock;
use crate::ingest::{BootParams, BootResult, HealthStatus, IngestController, IngestError};
use crate::models::{Channel, ChannelId, RenditionManifest, SessionId, StreamSession};
use crate::resilience::{retry::IngestRetryPolicy, with_timeout};
use crate::{Error, Result};

/// Persistence steps of the stream state machine
///
/// Each method is one atomic unit in the backing store. Implementations must
/// serialize calls against the same channel.
#[async_trait]
pub trait StreamStateStore: Send + Sync {
    /// Mark the channel `starting` with `session_id`.
    /// Fails with not found, or `channel already live` if a session is set.
    async fn claim_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Channel>;

    /// Return the channel to `offline` if it still belongs to `session_id`
    async fn release_channel(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Store the new session and flip the channel to `live`
    async fn commit_live(&self, session: &StreamSession, now: DateTime<Utc>) -> Result<()>;

    /// The channel and its session; `channel is not live` unless live
    async fn live_session(&self, channel_id: &ChannelId) -> Result<(Channel, StreamSession)>;

    /// End the session, create its recording and take the channel offline
    async fn commit_stop(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
        peak_concurrent: i32,
    ) -> Result<StreamSession>;
}

#[derive(Debug, Clone)]
struct HealthSnapshot {
    statuses: Vec<HealthStatus>,
    checked_at: DateTime<Utc>,
}

/// Drives `offline -> starting -> live -> offline` against the ingest controller
pub struct StreamLifecycle {
    controller: Arc<dyn IngestController>,
    retry: IngestRetryPolicy,
    timeout: Duration,
    clock: Clock,
    health: RwLock<Option<HealthSnapshot>>,
}

impl StreamLifecycle {
    pub fn new(
        controller: Arc<dyn IngestController>,
        retry: IngestRetryPolicy,
        timeout: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            controller,
            retry,
            timeout,
            clock,
            health: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// StartStream: claim, boot with retry, then commit or roll back
    pub async fn start_stream<S>(
        &self,
        store: &S,
        channel_id: &ChannelId,
        renditions: &[String],
    ) -> Result<StreamSession>
    where
        S: StreamStateStore + ?Sized,
    {
        let session_id = SessionId::new();
        let channel = store.claim_channel(channel_id, &session_id, self.now()).await?;
        info!(%channel_id, %session_id, "Channel starting");

        let params = BootParams {
            channel_id: channel_id.clone(),
            session_id: session_id.clone(),
            stream_key: channel.stream_key,
            renditions: renditions.to_vec(),
        };

        let boot = match self.boot(&params).await {
            Ok(boot) => boot,
            Err(e) => {
                self.release(store, channel_id, &session_id).await;
                return Err(e);
            }
        };

        let session = Self::assemble_session(&params, boot, self.now());
        if let Err(e) = store.commit_live(&session, self.now()).await {
            error!(%channel_id, %session_id, error = %e, "Failed to persist live session");
            if let Err(shutdown) = self.shutdown(&session).await {
                warn!(%channel_id, %session_id, error = %shutdown, "Failed to shut down orphaned ingest");
            }
            self.release(store, channel_id, &session_id).await;
            return Err(e);
        }

        info!(%channel_id, %session_id, jobs = session.ingest_job_ids.len(), "Channel live");
        Ok(session)
    }

    /// StopStream: shut down ingest, then end the session atomically
    pub async fn stop_stream<S>(
        &self,
        store: &S,
        channel_id: &ChannelId,
        peak_concurrent: i32,
    ) -> Result<StreamSession>
    where
        S: StreamStateStore + ?Sized,
    {
        let (_, session) = store.live_session(channel_id).await?;

        if let Err(e) = self.shutdown(&session).await {
            warn!(%channel_id, session_id = %session.id, error = %e, "Ingest shutdown failed, channel stays live");
            return Err(e);
        }

        // Ingest is already torn down; a failure below leaves the channel live
        // and is not compensated.
        match store
            .commit_stop(channel_id, &session.id, self.now(), peak_concurrent)
            .await
        {
            Ok(ended) => {
                info!(%channel_id, session_id = %ended.id, "Stream stopped");
                Ok(ended)
            }
            Err(e) => {
                error!(%channel_id, session_id = %session.id, error = %e, "Failed to persist stopped session");
                Err(e)
            }
        }
    }

    /// Boot with bounded retry; each attempt is bounded by the ingest timeout
    pub async fn boot(&self, params: &BootParams) -> Result<BootResult> {
        let mut last_error = None;
        for (attempt, delay) in (1_u32..).zip(self.retry.delays()) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = with_timeout(self.timeout, self.controller.boot_stream(params), || {
                IngestError::Timeout {
                    operation: "boot stream",
                    timeout: self.timeout,
                }
            })
            .await;
            match outcome {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        channel_id = %params.channel_id,
                        session_id = %params.session_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Ingest boot attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map_or_else(
            || Error::Internal("ingest boot was not attempted".to_string()),
            Error::Ingest,
        ))
    }

    /// Tear down the session's ingest resources, bounded by the ingest timeout
    pub async fn shutdown(&self, session: &StreamSession) -> Result<()> {
        with_timeout(
            self.timeout,
            self.controller
                .shutdown_stream(&session.channel_id, &session.id, &session.ingest_job_ids),
            || IngestError::Timeout {
                operation: "shutdown stream",
                timeout: self.timeout,
            },
        )
        .await
        .map_err(Error::Ingest)
    }

    /// Build the session record from a successful boot
    #[must_use]
    pub fn assemble_session(
        params: &BootParams,
        boot: BootResult,
        started_at: DateTime<Utc>,
    ) -> StreamSession {
        let ingest_endpoints = boot.ingest_endpoints();
        StreamSession {
            id: params.session_id.clone(),
            channel_id: params.channel_id.clone(),
            started_at,
            ended_at: None,
            renditions: params.renditions.clone(),
            peak_concurrent: 0,
            origin_url: boot.origin_url,
            playback_url: boot.playback_url,
            ingest_endpoints,
            ingest_job_ids: boot.job_ids,
            rendition_manifests: boot
                .renditions
                .into_iter()
                .map(|rendition| RenditionManifest {
                    name: rendition.name,
                    manifest_url: rendition.manifest_url,
                    bitrate: rendition.bitrate,
                })
                .collect(),
        }
    }

    async fn release<S>(&self, store: &S, channel_id: &ChannelId, session_id: &SessionId)
    where
        S: StreamStateStore + ?Sized,
    {
        match store.release_channel(channel_id, session_id, self.now()).await {
            Ok(()) => info!(%channel_id, %session_id, "Channel rolled back to offline"),
            Err(e) => error!(%channel_id, %session_id, error = %e, "Failed to roll back channel"),
        }
    }

    /// Query the controller and remember the result
    pub async fn check_health(&self) -> Vec<HealthStatus> {
        let mut statuses = self.controller.health_checks().await;
        if statuses.is_empty() {
            statuses.push(HealthStatus::new("ingest", "unknown"));
        }
        *self.health.write() = Some(HealthSnapshot {
            statuses: statuses.clone(),
            checked_at: self.now(),
        });
        statuses
    }

    /// Last recorded health snapshot and when it was taken
    #[must_use]
    pub fn last_health(&self) -> Option<(Vec<HealthStatus>, DateTime<Utc>)> {
        self.health
            .read()
            .as_ref()
            .map(|snapshot| (snapshot.statuses.clone(), snapshot.checked_at))
    }
}
