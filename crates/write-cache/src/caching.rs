//! Caching Storage Backend
//!
//! Dual-write protocol: every record is enqueued in the durable cache first,
//! then forwarded to the target once on a best-effort basis. Records the
//! target rejects stay queued for the background flusher; the producer is
//! only failed when the local cache itself cannot take the record.

use crate::cache::{CacheStats, DurableCache, EntryId};
use crate::config::CacheConfig;
use crate::flusher::{flush_pass, CacheFlusher, FlushReport};
use async_trait::async_trait;
use std::sync::Arc;
use storage::{Record, StorageBackend, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Cache and target, mutated only under one lock
pub(crate) struct CacheState {
    pub(crate) cache: DurableCache,
    pub(crate) target: Box<dyn StorageBackend>,
}

/// Read-only view of cache occupancy, cloneable across tasks.
///
/// Reads go straight to the cache database and never wait for a flush pass
/// to release the state lock.
#[derive(Clone)]
pub struct CacheStatsHandle {
    cache: DurableCache,
}

impl CacheStatsHandle {
    /// Current total and pending counts
    pub async fn stats(&self) -> Result<CacheStats, StorageError> {
        Ok(self.cache.stats().await?)
    }
}

/// Storage backend that wraps a target with a durable write-behind cache
pub struct CachingStorageBackend {
    state: Arc<Mutex<CacheState>>,
    stats: CacheStatsHandle,
    flusher: Option<CacheFlusher>,
    batch_size: usize,
    name: String,
    closed: bool,
}

impl CachingStorageBackend {
    /// Open the cache at `config.db_path` and start flushing into `target`
    pub async fn new(
        target: Box<dyn StorageBackend>,
        config: &CacheConfig,
    ) -> Result<Self, StorageError> {
        let cache = DurableCache::open(config.db_path()).await?;
        let name = format!("cached-{}", target.name());
        let stats = CacheStatsHandle { cache: cache.clone() };
        let state = Arc::new(Mutex::new(CacheState { cache, target }));

        let flusher = CacheFlusher::spawn(state.clone(), config.flush_interval(), config.batch_size());
        info!(
            "Caching enabled for {} (cache {}, flush every {:?}, batch {})",
            name,
            config.db_path(),
            config.flush_interval(),
            config.batch_size()
        );

        Ok(Self {
            state,
            stats,
            flusher: Some(flusher),
            batch_size: config.batch_size(),
            name,
            closed: false,
        })
    }

    /// Current total and pending counts
    pub async fn stats(&self) -> Result<CacheStats, StorageError> {
        self.ensure_open()?;
        self.stats.stats().await
    }

    /// Handle for querying stats from other tasks
    pub fn stats_handle(&self) -> CacheStatsHandle {
        self.stats.clone()
    }

    /// Run one flush pass now, outside the timer
    pub async fn flush_now(&self) -> Result<FlushReport, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        Ok(flush_pass(&mut state, self.batch_size).await?)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

/// Remove entries the target has just confirmed. A failed delete only means
/// the flusher will deliver the record again later.
async fn acknowledge(cache: &DurableCache, ids: &[EntryId]) {
    for &id in ids {
        if let Err(e) = cache.mark_delivered(id).await {
            warn!("Could not remove delivered entry {}: {}", id, e);
        }
    }
}

#[async_trait]
impl StorageBackend for CachingStorageBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let id = state.cache.enqueue(record).await?;
        metrics::counter!("gateway_cache_enqueued_total").increment(1);

        match state.target.save(record).await {
            Ok(()) => {
                acknowledge(&state.cache, &[id]).await;
                debug!("Forwarded {} directly (entry {})", record.sensor_name, id);
            }
            Err(e) => {
                metrics::counter!("gateway_cache_direct_failed_total").increment(1);
                warn!(
                    "Direct write of {} failed, entry {} kept for retry: {}",
                    record.sensor_name, id, e
                );
            }
        }
        Ok(())
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.ensure_open()?;
        if records.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(state.cache.enqueue(record).await?);
        }
        metrics::counter!("gateway_cache_enqueued_total").increment(ids.len() as u64);
        debug!("Cached batch of {} records", ids.len());

        match state.target.save_batch(records).await {
            Ok(()) => acknowledge(&state.cache, &ids).await,
            Err(e) => {
                metrics::counter!("gateway_cache_direct_failed_total").increment(ids.len() as u64);
                warn!("Direct batch write failed, {} entries kept for retry: {}", ids.len(), e);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(flusher) = self.flusher.take() {
            flusher.stop().await;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // Drain while full batches keep going through cleanly
        loop {
            match flush_pass(state, self.batch_size).await {
                Ok(report) if report.failed == 0 && report.attempted == self.batch_size => continue,
                Ok(_) => break,
                Err(e) => {
                    error!("Final cache flush aborted: {}", e);
                    break;
                }
            }
        }

        match state.cache.stats().await {
            Ok(stats) if stats.total_count > 0 => warn!(
                "Closing with {} cached entries ({} pending) left in {}",
                stats.total_count,
                stats.pending_count,
                state.cache.path().display()
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not read cache stats on close: {}", e),
        }

        state.cache.close().await;
        state.target.close().await?;
        info!("{} closed", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
