//! Storage Layer
//!
//! Measurement records and the interchangeable backends they are persisted to:
//! SQLite, InfluxDB (HTTP line protocol), CSV flat files and an in-memory store.

mod backend;
mod csv;
mod influx;
mod memory;
mod record;
mod sqlite;

pub use backend::StorageBackend;
pub use csv::{CsvBackend, CsvConfig};
pub use influx::{InfluxBackend, InfluxConfig};
pub use memory::{MemoryBackend, MemoryConfig};
pub use record::Record;
pub use sqlite::{SqliteBackend, SqliteConfig};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Remote write failed: {0}")]
    RemoteError(String),
    #[error("Local cache error: {0}")]
    CacheError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage backend is closed")]
    Closed,
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::RemoteError(err.to_string())
    }
}
