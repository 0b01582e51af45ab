use thiserror::Error;

use crate::ingest::IngestError;
use crate::object_storage::ObjectStorageError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Object storage error: {0}")]
    ObjectStorage(#[from] ObjectStorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Not-found error naming the entity kind and id, e.g. `channel abc123`
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} {id}"))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// True for ingest and object storage timeouts
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Ingest(IngestError::Timeout { .. })
                | Self::ObjectStorage(ObjectStorageError::Timeout { .. })
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("resource".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => Self::Conflict(format!("already exists: {}", db_err.message())),
                    // PostgreSQL foreign_key_violation
                    "23503" => Self::NotFound("referenced resource".to_string()),
                    // PostgreSQL check_violation
                    "23514" => Self::InvalidInput("constraint check failed".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Self::InvalidInput("required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Persistence(format!("rename dataset file: {}", err.error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
