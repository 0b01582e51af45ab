use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub object_storage: ObjectStorageConfig,
    pub retention: RetentionConfig,
}

/// Which repository backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    FlatFile,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON dataset path for the flat-file backend
    pub data_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::FlatFile,
            data_file: "./data/riverlive.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Boot attempts per StartStream, including the first
    pub max_boot_attempts: u32,
    pub retry_interval_ms: u64,
    /// Per-call bound on boot and shutdown
    pub operation_timeout_seconds: u64,
    pub http: HttpIngestConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_boot_attempts: 1,
            retry_interval_ms: 500,
            operation_timeout_seconds: 12,
            http: HttpIngestConfig::default(),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }
}

/// SRS relay, OvenMediaEngine origin and transcoder job service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpIngestConfig {
    pub srs_base_url: String,
    pub srs_token: String,
    pub ome_base_url: String,
    pub ome_username: String,
    pub ome_password: String,
    pub job_base_url: String,
    pub job_token: String,
    pub health_endpoint: String,
    /// Rendition ladder as `name:bitrate,...`
    pub ladder: String,
    pub request_timeout_seconds: u64,
}

impl Default for HttpIngestConfig {
    fn default() -> Self {
        Self {
            srs_base_url: String::new(),
            srs_token: String::new(),
            ome_base_url: String::new(),
            ome_username: String::new(),
            ome_password: String::new(),
            job_base_url: String::new(),
            job_token: String::new(),
            health_endpoint: "/healthz".to_string(),
            ladder: "1080p:6000,720p:4000,480p:2500".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl HttpIngestConfig {
    /// True when any endpoint or credential is set
    #[must_use]
    pub fn is_configured(&self) -> bool {
        [
            &self.srs_base_url,
            &self.srs_token,
            &self.ome_base_url,
            &self.ome_username,
            &self.ome_password,
            &self.job_base_url,
            &self.job_token,
        ]
        .iter()
        .any(|value| !value.trim().is_empty())
    }

    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("srs_base_url", &self.srs_base_url),
            ("srs_token", &self.srs_token),
            ("ome_base_url", &self.ome_base_url),
            ("ome_username", &self.ome_username),
            ("ome_password", &self.ome_password),
            ("job_base_url", &self.job_base_url),
            ("job_token", &self.job_token),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
    pub prefix: String,
    /// Base URL that public object links are built from
    pub public_endpoint: String,
    pub request_timeout_seconds: u64,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            use_ssl: true,
            prefix: String::new(),
            public_endpoint: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

impl ObjectStorageConfig {
    /// Both bucket and endpoint are required, otherwise storage is disabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.bucket.trim().is_empty() && !self.endpoint.trim().is_empty()
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Recording retention windows; zero means unbounded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub published_seconds: u64,
    pub unpublished_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            published_seconds: 90 * 24 * 60 * 60,
            unpublished_seconds: 14 * 24 * 60 * 60,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority order:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // RIVERLIVE_STORAGE__BACKEND, RIVERLIVE_DATABASE__URL, ...
        builder = builder.add_source(
            Environment::with_prefix("RIVERLIVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Reject settings the repository cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_boot_attempts == 0 {
            return Err(Error::InvalidInput(
                "ingest.max_boot_attempts must be at least 1".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Postgres && self.database.url.trim().is_empty() {
            return Err(Error::InvalidInput(
                "database.url is required for the postgres backend".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::FlatFile && self.storage.data_file.trim().is_empty() {
            return Err(Error::InvalidInput(
                "storage.data_file is required for the flat-file backend".to_string(),
            ));
        }
        if self.ingest.http.is_configured() {
            let missing = self.ingest.http.missing_fields();
            if !missing.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "missing ingest configuration: {}",
                    missing.join(", ")
                )));
            }
            crate::ingest::parse_ladder(&self.ingest.http.ladder)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StorageBackend::FlatFile);
        assert_eq!(config.ingest.max_boot_attempts, 1);
        assert_eq!(config.ingest.operation_timeout(), Duration::from_secs(12));
        assert_eq!(config.object_storage.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.retention.published_seconds, 7_776_000);
        assert_eq!(config.retention.unpublished_seconds, 1_209_600);
        assert!(!config.object_storage.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.ingest.max_boot_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_database_url_for_postgres() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());
        config.database.url = "postgres://localhost/riverlive".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_partial_ingest_config() {
        let mut config = Config::default();
        config.ingest.http.srs_base_url = "http://srs".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("srs_token"));
        assert!(err.contains("job_base_url"));
        assert!(!err.contains("srs_base_url"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riverlive.toml");
        std::fs::write(
            &path,
            "[storage]\nbackend = \"postgres\"\n[database]\nurl = \"postgres://db\"\n[ingest]\nmax_boot_attempts = 3\n",
        )
        .unwrap();
        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.database.url, "postgres://db");
        assert_eq!(config.ingest.max_boot_attempts, 3);
        assert_eq!(config.ingest.retry_interval_ms, 500);
    }
}
