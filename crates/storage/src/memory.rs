//! In-Memory Backend

use crate::{Record, StorageBackend, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// In-memory backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Max records retained before the oldest are dropped
    pub max_records: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_records: 100_000,
        }
    }
}

/// Bounded in-memory backend.
///
/// Clones share the same record log, so a clone kept by the caller can
/// inspect what a boxed instance received.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    log: Arc<Mutex<VecDeque<Record>>>,
    max_records: usize,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new(config: &MemoryConfig) -> Self {
        info!("Creating in-memory backend (max {} records)", config.max_records);
        Self {
            log: Arc::new(Mutex::new(VecDeque::with_capacity(config.max_records.min(10_000)))),
            max_records: config.max_records.max(1),
        }
    }

    fn push(&self, records: &[Record]) -> Result<(), StorageError> {
        let mut log = self
            .log
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))?;

        for record in records {
            // Enforce retention
            while log.len() >= self.max_records {
                log.pop_front();
            }
            log.push_back(record.clone());
        }
        debug!("Memory backend holds {} records", log.len());
        Ok(())
    }

    /// Snapshot of retained records, oldest first
    pub fn records(&self) -> Vec<Record> {
        self.log
            .lock()
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.log.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Check if no records are retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.push(std::slice::from_ref(record))
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.push(records)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_inspect_through_clone() {
        let observer = MemoryBackend::default();
        let mut backend: Box<dyn StorageBackend> = Box::new(observer.clone());

        backend.save(&Record::new("greenhouse", 1, 22.5, 48.0)).await.unwrap();

        let records = observer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_name, "greenhouse");
    }

    #[tokio::test]
    async fn test_retention_limit() {
        let mut backend = MemoryBackend::new(&MemoryConfig { max_records: 5 });

        let batch: Vec<_> = (0..10)
            .map(|i| Record::with_timestamp("s", 1, i as f64, 0.0, i))
            .collect();
        backend.save_batch(&batch).await.unwrap();

        assert_eq!(backend.len(), 5);
        assert_eq!(backend.records()[0].timestamp_ms, 5);
    }
}
