//! Shared fixtures for tests

use crate::DurableCache;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{MemoryBackend, Record, StorageBackend, StorageError};

pub fn record(i: i64) -> Record {
    Record::with_timestamp(format!("sensor-{}", i), 1, 20.0 + i as f64, 50.0, 1_700_000_000_000 + i)
}

pub async fn temp_cache() -> (tempfile::TempDir, DurableCache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = DurableCache::open(dir.path().join("cache.db")).await.unwrap();
    (dir, cache)
}

/// Backend whose availability can be toggled from the test
#[derive(Clone, Default)]
pub struct FlakyBackend {
    pub delivered: MemoryBackend,
    failing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyBackend {
    pub fn failing() -> Self {
        let backend = Self::default();
        backend.set_failing(true);
        backend
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::RemoteError("backend down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.check()?;
        self.delivered.save(record).await
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.check()?;
        self.delivered.save_batch(records).await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
