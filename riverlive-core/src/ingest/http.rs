//! HTTP ingest controller
//!
//! Boots a stream in three stages: an SRS relay channel, an OvenMediaEngine
//! origin application and a set of transcoder jobs. A failed stage tears down
//! the stages before it.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{parse_ladder, BootParams, BootResult, HealthStatus, IngestController, IngestError, Rendition};
use crate::config::HttpIngestConfig;
use crate::models::{ChannelId, SessionId};
use crate::{Error, Result};

const SRS: &str = "srs";
const OME: &str = "ovenmediaengine";
const TRANSCODER: &str = "transcoder";

#[derive(Clone, Copy)]
enum Auth<'a> {
    Bearer(&'a str),
    Basic(&'a str, &'a str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SrsChannelRequest<'a> {
    channel_id: &'a str,
    stream_key: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct SrsChannelResponse {
    primary_ingest: String,
    backup_ingest: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OmeApplicationRequest<'a> {
    channel_id: &'a str,
    renditions: &'a [String],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct OmeApplicationResponse {
    origin_url: String,
    playback_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobRequest<'a> {
    channel_id: &'a str,
    session_id: &'a str,
    origin_url: &'a str,
    renditions: &'a [Rendition],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct JobResponse {
    job_id: String,
    job_ids: Vec<String>,
    renditions: Vec<Rendition>,
}

/// Ingest controller backed by the relay, origin and transcoder HTTP APIs
#[derive(Debug, Clone)]
pub struct HttpIngestController {
    client: reqwest::Client,
    config: HttpIngestConfig,
    ladder: Vec<Rendition>,
}

impl HttpIngestController {
    pub fn new(config: HttpIngestConfig) -> Result<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "missing ingest configuration: {}",
                missing.join(", ")
            )));
        }
        let ladder = parse_ladder(&config.ladder)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build ingest HTTP client: {e}")))?;
        Ok(Self { client, config, ladder })
    }

    #[must_use]
    pub fn ladder(&self) -> &[Rendition] {
        &self.ladder
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{path}", base.trim_end_matches('/'))
    }

    fn srs_auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.srs_token)
    }

    fn ome_auth(&self) -> Auth<'_> {
        Auth::Basic(&self.config.ome_username, &self.config.ome_password)
    }

    fn job_auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.job_token)
    }

    fn authorize(request: reqwest::RequestBuilder, auth: Auth<'_>) -> reqwest::RequestBuilder {
        match auth {
            Auth::Bearer(token) if !token.is_empty() => request.bearer_auth(token),
            Auth::Bearer(_) => request,
            Auth::Basic(user, password) => request.basic_auth(user, Some(password)),
        }
    }

    async fn send(
        &self,
        service: &'static str,
        request: reqwest::RequestBuilder,
        auth: Auth<'_>,
    ) -> std::result::Result<reqwest::Response, IngestError> {
        let response = Self::authorize(request, auth)
            .send()
            .await
            .map_err(|source| IngestError::Transport { service, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Status {
                service,
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }

    async fn post<P: Serialize + Sync, R: DeserializeOwned>(
        &self,
        service: &'static str,
        url: &str,
        auth: Auth<'_>,
        payload: &P,
    ) -> std::result::Result<R, IngestError> {
        debug!(service, url, "POST ingest request");
        let response = self.send(service, self.client.post(url).json(payload), auth).await?;
        response
            .json::<R>()
            .await
            .map_err(|source| IngestError::Transport { service, source })
    }

    async fn delete(
        &self,
        service: &'static str,
        url: &str,
        auth: Auth<'_>,
    ) -> std::result::Result<(), IngestError> {
        debug!(service, url, "DELETE ingest request");
        self.send(service, self.client.delete(url), auth).await?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> std::result::Result<(), IngestError> {
        let url = Self::url(&self.config.srs_base_url, &format!("/v1/channels/{channel_id}"));
        self.delete(SRS, &url, self.srs_auth()).await
    }

    async fn delete_application(&self, channel_id: &str) -> std::result::Result<(), IngestError> {
        let url = Self::url(&self.config.ome_base_url, &format!("/v1/applications/{channel_id}"));
        self.delete(OME, &url, self.ome_auth()).await
    }

    async fn stop_job(&self, job_id: &str) -> std::result::Result<(), IngestError> {
        let url = Self::url(&self.config.job_base_url, &format!("/v1/jobs/{job_id}"));
        self.delete(TRANSCODER, &url, self.job_auth()).await
    }

    async fn check(&self, component: &'static str, base: &str, auth: Auth<'_>) -> HealthStatus {
        if base.trim().is_empty() {
            return HealthStatus::new(component, "unknown").with_detail("base URL not configured");
        }
        let url = Self::url(base, &self.config.health_endpoint);
        match Self::authorize(self.client.get(&url), auth).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::new(component, "ok"),
            Ok(response) => {
                HealthStatus::new(component, "error").with_detail(response.status().to_string())
            }
            Err(e) => HealthStatus::new(component, "error").with_detail(e.to_string()),
        }
    }
}

#[async_trait]
impl IngestController for HttpIngestController {
    async fn boot_stream(&self, params: &BootParams) -> std::result::Result<BootResult, IngestError> {
        let channel_id = params.channel_id.as_str();
        if channel_id.is_empty() || params.stream_key.is_empty() {
            return Err(IngestError::Rejected(
                "channel id and stream key are required".to_string(),
            ));
        }

        let srs: SrsChannelResponse = self
            .post(
                SRS,
                &Self::url(&self.config.srs_base_url, "/v1/channels"),
                self.srs_auth(),
                &SrsChannelRequest {
                    channel_id,
                    stream_key: &params.stream_key,
                },
            )
            .await?;

        let ome: OmeApplicationResponse = match self
            .post(
                OME,
                &Self::url(&self.config.ome_base_url, "/v1/applications"),
                self.ome_auth(),
                &OmeApplicationRequest {
                    channel_id,
                    renditions: &params.renditions,
                },
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if let Err(rollback) = self.delete_channel(channel_id).await {
                    warn!(channel_id, error = %rollback, "Failed to roll back SRS channel");
                }
                return Err(e);
            }
        };

        let jobs: JobResponse = match self
            .post(
                TRANSCODER,
                &Self::url(&self.config.job_base_url, "/v1/jobs"),
                self.job_auth(),
                &JobRequest {
                    channel_id,
                    session_id: params.session_id.as_str(),
                    origin_url: &ome.origin_url,
                    renditions: &self.ladder,
                },
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if let Err(rollback) = self.delete_application(channel_id).await {
                    warn!(channel_id, error = %rollback, "Failed to roll back OME application");
                }
                if let Err(rollback) = self.delete_channel(channel_id).await {
                    warn!(channel_id, error = %rollback, "Failed to roll back SRS channel");
                }
                return Err(e);
            }
        };

        let mut job_ids = jobs.job_ids;
        if !jobs.job_id.is_empty() {
            job_ids.push(jobs.job_id);
        }

        Ok(BootResult {
            primary_ingest: Some(srs.primary_ingest).filter(|s| !s.is_empty()),
            backup_ingest: Some(srs.backup_ingest).filter(|s| !s.is_empty()),
            origin_url: ome.origin_url,
            playback_url: ome.playback_url,
            renditions: jobs.renditions,
            job_ids,
        })
    }

    async fn shutdown_stream(
        &self,
        channel_id: &ChannelId,
        _session_id: &SessionId,
        job_ids: &[String],
    ) -> std::result::Result<(), IngestError> {
        let mut errors = Vec::new();
        for job_id in job_ids {
            if let Err(e) = self.stop_job(job_id).await {
                errors.push(IngestError::Rejected(format!("stop job {job_id}: {e}")));
            }
        }
        if let Err(e) = self.delete_application(channel_id.as_str()).await {
            errors.push(IngestError::Rejected(format!("delete OME app: {e}")));
        }
        if let Err(e) = self.delete_channel(channel_id.as_str()).await {
            errors.push(IngestError::Rejected(format!("delete SRS channel: {e}")));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Multiple(errors))
        }
    }

    async fn health_checks(&self) -> Vec<HealthStatus> {
        vec![
            self.check(SRS, &self.config.srs_base_url, self.srs_auth()).await,
            self.check(OME, &self.config.ome_base_url, self.ome_auth()).await,
            self.check(TRANSCODER, &self.config.job_base_url, self.job_auth()).await,
        ]
    }
}
