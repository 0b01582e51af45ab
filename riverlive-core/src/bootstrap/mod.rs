//! Bootstrap: turn a [`Config`] into a ready [`Repository`]
//!
//! This module handles:
//! - Configuration loading
//! - Database initialization
//! - Collaborator wiring (ingest controller, object storage, policies)

pub mod config;
pub mod database;

pub use config::load_config;
pub use database::{init_database, run_migrations};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::{IngestConfig, StorageBackend};
use crate::ingest::{HttpIngestController, IngestController, NoopIngestController};
use crate::object_storage::build_object_storage;
use crate::repository::{FlatFileRepository, PostgresRepository, Repository, RepositoryOptions};
use crate::service::RetentionPolicy;
use crate::Config;

/// Build the HTTP ingest controller when endpoints are configured, otherwise the no-op
pub fn build_ingest_controller(config: &IngestConfig) -> Result<Arc<dyn IngestController>> {
    if !config.http.is_configured() {
        info!("Ingest endpoints not configured, streams boot without ingest");
        return Ok(Arc::new(NoopIngestController));
    }
    let controller = HttpIngestController::new(config.http.clone())
        .context("Failed to build HTTP ingest controller")?;
    info!("HTTP ingest controller initialized");
    Ok(Arc::new(controller))
}

/// Collaborators and policies derived from configuration
pub fn repository_options(config: &Config) -> Result<RepositoryOptions> {
    let object_storage = build_object_storage(&config.object_storage)
        .context("Failed to build object storage client")?;
    Ok(RepositoryOptions::new()
        .with_ingest_controller(build_ingest_controller(&config.ingest)?)
        .with_ingest_retry(config.ingest.max_boot_attempts, config.ingest.retry_interval())
        .with_ingest_timeout(config.ingest.operation_timeout())
        .with_object_storage(object_storage)
        .with_object_storage_timeout(config.object_storage.request_timeout())
        .with_retention(RetentionPolicy::from(&config.retention)))
}

/// Build the configured backend
pub async fn build_repository(config: &Config) -> Result<Arc<dyn Repository>> {
    config.validate()?;
    let options = repository_options(config)?;

    let repository: Arc<dyn Repository> = match config.storage.backend {
        StorageBackend::FlatFile => {
            let repo = FlatFileRepository::open(&config.storage.data_file, &options)
                .with_context(|| format!("Failed to open dataset {}", config.storage.data_file))?;
            Arc::new(repo)
        }
        StorageBackend::Postgres => {
            let pool = init_database(&config.database).await?;
            Arc::new(PostgresRepository::new(pool, &options))
        }
    };

    repository.ping().await.context("Repository health check failed")?;
    info!(backend = ?config.storage.backend, "Repository ready");
    Ok(repository)
}
