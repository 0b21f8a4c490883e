//! Background Cache Flusher

use crate::caching::CacheState;
use crate::{CacheError, RETRY_CEILING};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries handed to the target backend
    pub attempted: usize,
    /// Entries confirmed and removed from the cache
    pub delivered: usize,
    /// Entries whose retry count was incremented
    pub failed: usize,
}

/// Deliver up to `batch_size` queued entries, oldest first.
///
/// The caller holds the state lock for the whole pass. A target failure
/// only bumps that entry's retry count; a cache failure aborts the pass.
pub(crate) async fn flush_pass(
    state: &mut CacheState,
    batch_size: usize,
) -> Result<FlushReport, CacheError> {
    let entries = state.cache.peek_batch(RETRY_CEILING, batch_size).await?;
    let mut report = FlushReport::default();
    if entries.is_empty() {
        return Ok(report);
    }

    info!("Flushing {} cached records to {}", entries.len(), state.target.name());

    for entry in entries {
        report.attempted += 1;
        match state.target.save(&entry.record).await {
            Ok(()) => {
                if !state.cache.mark_delivered(entry.id).await? {
                    debug!("Entry {} was already removed", entry.id);
                }
                report.delivered += 1;
            }
            Err(e) => {
                state.cache.mark_failed(entry.id).await?;
                report.failed += 1;

                let attempts = entry.retry_count + 1;
                if attempts >= RETRY_CEILING {
                    warn!(
                        "Entry {} ({}) failed {} times, no longer retried: {}",
                        entry.id, entry.record.sensor_name, attempts, e
                    );
                } else {
                    warn!("Flush of entry {} failed (attempt {}): {}", entry.id, attempts, e);
                }
            }
        }
    }

    metrics::counter!("gateway_cache_flush_delivered_total").increment(report.delivered as u64);
    metrics::counter!("gateway_cache_flush_failed_total").increment(report.failed as u64);

    let stats = state.cache.stats().await?;
    metrics::gauge!("gateway_cache_total_entries").set(stats.total_count as f64);
    metrics::gauge!("gateway_cache_pending_entries").set(stats.pending_count as f64);

    info!(
        "Flush pass: {} delivered, {} failed, {} still pending",
        report.delivered, report.failed, stats.pending_count
    );
    Ok(report)
}

/// Handle to the periodic flush task
pub(crate) struct CacheFlusher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CacheFlusher {
    /// Spawn the flush loop; the first pass runs one `period` from now
    pub(crate) fn spawn(state: Arc<Mutex<CacheState>>, period: Duration, batch_size: usize) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run(state, period, batch_size, rx));
        Self { shutdown, handle }
    }

    /// Request a stop and wait for the task to exit.
    ///
    /// A pass already in progress runs to completion first.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Cache flusher task ended abnormally: {}", e);
        }
    }
}

async fn run(
    state: Arc<Mutex<CacheState>>,
    period: Duration,
    batch_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Cache flusher started (every {:?}, batch {})", period, batch_size);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                // Sender dropped means the owning backend is gone
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let mut guard = state.lock().await;
                if let Err(e) = flush_pass(&mut guard, batch_size).await {
                    error!("Cache flush pass aborted: {}", e);
                }
            }
        }
    }

    info!("Cache flusher stopped");
}
