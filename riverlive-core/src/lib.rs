pub mod models;
pub mod repository;
pub mod service;
pub mod ingest;
pub mod object_storage;
pub mod config;
pub mod error;
pub mod logging;
pub mod bootstrap;
pub mod transaction;
pub mod resilience;
pub mod snapshot;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
pub use repository::Repository;
pub use transaction::{UnitOfWork, with_transaction};
