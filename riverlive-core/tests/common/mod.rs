//! Shared fakes and backend harnesses for the integration suite

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riverlive_core::ingest::{BootParams, BootResult, HealthStatus, IngestController, IngestError, Rendition};
use riverlive_core::models::{ChannelId, SessionId};
use riverlive_core::object_storage::{ObjectReference, ObjectStorageClient, ObjectStorageError};
use riverlive_core::repository::{FlatFileRepository, PostgresRepository, Repository, RepositoryOptions};
use riverlive_core::service::{Clock, RetentionPolicy};

pub const UNPUBLISHED_RETENTION: Duration = Duration::from_secs(3600);
pub const PUBLISHED_RETENTION: Duration = Duration::from_secs(7200);

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .unwrap();
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += chrono::Duration::from_std(by).unwrap();
    }

    pub fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || *inner.lock())
    }
}

/// Ingest controller that records calls and fails on request
#[derive(Default)]
pub struct FakeIngest {
    pub boots: AtomicU32,
    pub shutdowns: Mutex<Vec<Vec<String>>>,
    failing_boots: AtomicU32,
    fail_shutdown: AtomicBool,
}

impl FakeIngest {
    /// Fail the next `count` boot attempts
    pub fn fail_boots(&self, count: u32) {
        self.failing_boots.store(count, Ordering::SeqCst);
    }

    pub fn fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    pub fn boot_count(&self) -> u32 {
        self.boots.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> Vec<Vec<String>> {
        self.shutdowns.lock().clone()
    }
}

#[async_trait]
impl IngestController for FakeIngest {
    async fn boot_stream(&self, params: &BootParams) -> Result<BootResult, IngestError> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_boots.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_boots.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::Rejected("transcoder unavailable".to_string()));
        }
        Ok(BootResult {
            primary_ingest: Some(format!("rtmp://ingest.test/live/{}", params.channel_id)),
            backup_ingest: None,
            origin_url: format!("http://origin.test/{}", params.channel_id),
            playback_url: format!("https://cdn.test/{}/index.m3u8", params.channel_id),
            renditions: params
                .renditions
                .iter()
                .map(|name| Rendition {
                    name: name.clone(),
                    manifest_url: format!("https://cdn.test/{}/{name}.m3u8", params.channel_id),
                    bitrate: 4000,
                })
                .collect(),
            job_ids: vec!["j1".to_string()],
        })
    }

    async fn shutdown_stream(
        &self,
        _channel_id: &ChannelId,
        _session_id: &SessionId,
        job_ids: &[String],
    ) -> Result<(), IngestError> {
        self.shutdowns.lock().push(job_ids.to_vec());
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(IngestError::Rejected("origin unreachable".to_string()));
        }
        Ok(())
    }

    async fn health_checks(&self) -> Vec<HealthStatus> {
        vec![HealthStatus::new("srs", "ok")]
    }
}

/// Object store that records uploads and deletes
#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
    failing_uploads: Mutex<Option<String>>,
}

impl FakeStorage {
    /// Reject uploads whose key contains `pattern`; `None` accepts everything
    pub fn fail_uploads(&self, pattern: Option<&str>) {
        *self.failing_uploads.lock() = pattern.map(ToString::to_string);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl ObjectStorageClient for FakeStorage {
    fn enabled(&self) -> bool {
        true
    }

    async fn upload(
        &self,
        key: &str,
        _content_type: &str,
        _body: Bytes,
    ) -> Result<ObjectReference, ObjectStorageError> {
        if let Some(pattern) = self.failing_uploads.lock().as_deref() {
            if key.contains(pattern) {
                return Err(ObjectStorageError::Rejected(format!("cannot upload {key}")));
            }
        }
        self.uploads.lock().push(key.to_string());
        Ok(ObjectReference {
            key: key.to_string(),
            url: Some(format!("https://objects.test/{key}")),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ObjectStorageError::Rejected(format!("cannot delete {key}")));
        }
        self.deletes.lock().push(key.to_string());
        Ok(())
    }
}

/// A repository plus handles on its collaborators
pub struct Backend {
    pub repo: Arc<dyn Repository>,
    pub ingest: Arc<FakeIngest>,
    pub storage: Arc<FakeStorage>,
    pub clock: ManualClock,
    _dir: Option<tempfile::TempDir>,
}

fn options(ingest: &Arc<FakeIngest>, storage: &Arc<FakeStorage>, clock: &ManualClock) -> RepositoryOptions {
    RepositoryOptions::new()
        .with_ingest_controller(ingest.clone())
        .with_ingest_retry(2, Duration::from_millis(5))
        .with_ingest_timeout(Duration::from_secs(2))
        .with_object_storage(storage.clone())
        .with_retention(RetentionPolicy {
            published: Some(PUBLISHED_RETENTION),
            unpublished: Some(UNPUBLISHED_RETENTION),
        })
        .with_clock(clock.clock())
}

pub fn flat_file_backend() -> Backend {
    let dir = tempfile::tempdir().unwrap();
    let ingest = Arc::new(FakeIngest::default());
    let storage = Arc::new(FakeStorage::default());
    let clock = ManualClock::new();
    let repo = FlatFileRepository::open(dir.path().join("riverlive.json"), &options(&ingest, &storage, &clock))
        .unwrap();
    Backend {
        repo: Arc::new(repo),
        ingest,
        storage,
        clock,
        _dir: Some(dir),
    }
}

/// Postgres backend in a fresh schema so concurrent tests never see each other's rows
pub async fn postgres_backend() -> Backend {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::Executor;

    let url = std::env::var("DATABASE_URL").unwrap();
    let schema = format!(
        "riverlive_test_{}",
        riverlive_core::models::generate_stream_key()[..16].to_lowercase()
    );

    let admin = PgPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
    admin
        .execute(format!("CREATE SCHEMA {schema}").as_str())
        .await
        .unwrap();

    let search_path = format!("SET search_path TO {schema}");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .unwrap();
    riverlive_core::bootstrap::run_migrations(&pool).await.unwrap();

    let ingest = Arc::new(FakeIngest::default());
    let storage = Arc::new(FakeStorage::default());
    let clock = ManualClock::new();
    let repo = PostgresRepository::new(pool, &options(&ingest, &storage, &clock));
    Backend {
        repo: Arc::new(repo),
        ingest,
        storage,
        clock,
        _dir: None,
    }
}
