//! Durable Write-Behind Cache
//!
//! Buffers records in a local SQLite queue in front of a storage backend
//! that may be unavailable:
//! - Every record is durable locally before any network attempt
//! - Immediate best-effort forward on the producer path
//! - Background flusher retries queued records in FIFO order
//! - Entries that fail `RETRY_CEILING` times are kept but no longer retried

mod cache;
mod caching;
mod config;
mod factory;
mod flusher;

#[cfg(test)]
mod test_support;

pub use cache::{CacheStats, DurableCache, EntryId, QueuedEntry};
pub use caching::{CacheStatsHandle, CachingStorageBackend};
pub use config::CacheConfig;
pub use factory::{build_storage, BuiltStorage, StorageConfig, StorageKind};
pub use flusher::FlushReport;

use storage::StorageError;
use thiserror::Error;

/// Failed flush attempts after which an entry is no longer retried
pub const RETRY_CEILING: u32 = 10;

/// Local cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt cache entry {id}: {reason}")]
    CorruptEntry { id: EntryId, reason: String },

    #[error("Cache is closed")]
    Closed,
}

impl From<CacheError> for StorageError {
    fn from(err: CacheError) -> Self {
        StorageError::CacheError(err.to_string())
    }
}
