//! Storage Backend Contract

use async_trait::async_trait;

use crate::{Record, StorageError};

/// A sink that measurement records are persisted to.
///
/// Implementations are not assumed to be safe for concurrent use; every
/// method takes `&mut self` and callers serialize access to an instance.
/// `close` is called at most once by well-behaved callers.
#[async_trait]
pub trait StorageBackend: Send {
    /// Persist one record
    async fn save(&mut self, record: &Record) -> Result<(), StorageError>;

    /// Persist a sequence of records.
    ///
    /// The default implementation saves records one at a time and stops at
    /// the first error, leaving earlier records persisted. Callers must treat
    /// any error as "batch not confirmed".
    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        for record in records {
            self.save(record).await?;
        }
        Ok(())
    }

    /// Release backend resources
    async fn close(&mut self) -> Result<(), StorageError>;

    /// Short label used in logs and metrics
    fn name(&self) -> &str;
}
