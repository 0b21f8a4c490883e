//! Durable Cache Implementation
//!
//! A SQLite-backed queue of records awaiting confirmed delivery. Entries are
//! identified by an autoincrement id that is never reused, so acknowledgement
//! by id is unambiguous even for records with identical values.

use crate::{CacheError, RETRY_CEILING};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::fmt;
use std::path::{Path, PathBuf};
use storage::Record;
use tracing::{debug, info, warn};

/// Stable identity of a queued entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record waiting in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEntry {
    pub id: EntryId,
    pub record: Record,
    /// Failed flush attempts so far
    pub retry_count: u32,
    /// When the entry was enqueued (ms since epoch)
    pub enqueued_at_ms: i64,
}

/// Cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// All entries, including those past the retry ceiling
    pub total_count: u64,
    /// Entries still eligible for automatic retry
    pub pending_count: u64,
}

impl CacheStats {
    /// Entries past the retry ceiling, waiting for an operator
    pub fn stuck_count(&self) -> u64 {
        self.total_count.saturating_sub(self.pending_count)
    }
}

/// Persistent FIFO queue of not-yet-confirmed records
///
/// Clones share the same connection, so a clone can read stats while the
/// owner is busy flushing.
#[derive(Clone)]
pub struct DurableCache {
    pool: SqlitePool,
    path: PathBuf,
}

impl DurableCache {
    /// Open (or create) the cache database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        // Single writer: one connection owns the file
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS data_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sensor_name TEXT NOT NULL,
                slave_id INTEGER NOT NULL,
                temperature REAL,
                humidity REAL,
                timestamp_ms INTEGER NOT NULL,
                enqueued_at_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_retry ON data_cache(retry_count)")
            .execute(&pool)
            .await?;

        let cache = Self { pool, path };
        let stats = cache.stats().await?;
        info!(
            "Durable cache opened at {} ({} entries, {} pending)",
            cache.path.display(),
            stats.total_count,
            stats.pending_count
        );
        Ok(cache)
    }

    /// Location of the cache database
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record with `retry_count = 0`
    pub async fn enqueue(&self, record: &Record) -> Result<EntryId, CacheError> {
        self.ensure_open()?;
        let result = sqlx::query(
            "INSERT INTO data_cache (sensor_name, slave_id, temperature, humidity, timestamp_ms, enqueued_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.sensor_name.as_str())
        .bind(i64::from(record.slave_id))
        .bind(record.temperature)
        .bind(record.humidity)
        .bind(record.timestamp_ms)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let id = EntryId(result.last_insert_rowid());
        debug!("Cached {} as entry {}", record.sensor_name, id);
        Ok(id)
    }

    /// Oldest entries with `retry_count < max_retry`, up to `limit`.
    ///
    /// Rows that no longer decode are pushed past the retry ceiling so they
    /// stop blocking the head of the queue; they remain counted as stuck.
    pub async fn peek_batch(&self, max_retry: u32, limit: usize) -> Result<Vec<QueuedEntry>, CacheError> {
        self.ensure_open()?;
        let rows = sqlx::query(
            "SELECT id, sensor_name, slave_id, temperature, humidity, timestamp_ms, enqueued_at_ms, retry_count \
             FROM data_cache WHERE retry_count < ? ORDER BY id ASC LIMIT ?",
        )
        .bind(i64::from(max_retry))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let id = EntryId(row.try_get("id")?);
                    warn!("Skipping cache entry {}: {}", id, e);
                    self.park(id, max_retry.max(RETRY_CEILING)).await?;
                }
            }
        }
        Ok(entries)
    }

    async fn park(&self, id: EntryId, retry_count: u32) -> Result<(), CacheError> {
        sqlx::query("UPDATE data_cache SET retry_count = MAX(retry_count, ?) WHERE id = ?")
            .bind(i64::from(retry_count))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a delivered entry. Returns `false` if it was already gone.
    pub async fn mark_delivered(&self, id: EntryId) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let result = sqlx::query("DELETE FROM data_cache WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed delivery attempt. Returns `false` if the entry no
    /// longer exists.
    pub async fn mark_failed(&self, id: EntryId) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let result = sqlx::query("UPDATE data_cache SET retry_count = retry_count + 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Total and pending (under the retry ceiling) entry counts
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.ensure_open()?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COALESCE(SUM(CASE WHEN retry_count < ? THEN 1 ELSE 0 END), 0) AS pending \
             FROM data_cache",
        )
        .bind(i64::from(RETRY_CEILING))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let pending: i64 = row.try_get("pending")?;
        Ok(CacheStats {
            total_count: total.max(0) as u64,
            pending_count: pending.max(0) as u64,
        })
    }

    /// Close the underlying database; later calls fail with `Closed`
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Durable cache at {} closed", self.path.display());
        }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.pool.is_closed() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

/// SQLite stores NaN as NULL
fn reading(row: &SqliteRow, column: &str) -> Result<f64, sqlx::Error> {
    Ok(row.try_get::<Option<f64>, _>(column)?.unwrap_or(f64::NAN))
}

fn decode_entry(row: &SqliteRow) -> Result<QueuedEntry, CacheError> {
    let id = EntryId(row.try_get("id")?);
    let slave_id: i64 = row.try_get("slave_id")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    let corrupt = |reason: String| CacheError::CorruptEntry { id, reason };
    Ok(QueuedEntry {
        id,
        record: Record {
            sensor_name: row.try_get("sensor_name")?,
            slave_id: u8::try_from(slave_id)
                .map_err(|_| corrupt(format!("slave_id {} out of range", slave_id)))?,
            temperature: reading(row, "temperature")?,
            humidity: reading(row, "humidity")?,
            timestamp_ms: row.try_get("timestamp_ms")?,
        },
        retry_count: u32::try_from(retry_count)
            .map_err(|_| corrupt(format!("retry_count {} out of range", retry_count)))?,
        enqueued_at_ms: row.try_get("enqueued_at_ms")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, temp_cache};

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids() {
        let (_dir, cache) = temp_cache().await;

        let a = cache.enqueue(&record(1)).await.unwrap();
        let b = cache.enqueue(&record(2)).await.unwrap();

        assert!(b > a);
        let entries = cache.peek_batch(RETRY_CEILING, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].retry_count, 0);
        assert_eq!(entries[0].record, record(1));
    }

    #[tokio::test]
    async fn test_peek_batch_is_fifo() {
        let (_dir, cache) = temp_cache().await;
        let mut ids = Vec::new();
        for i in 1..=5 {
            ids.push(cache.enqueue(&record(i)).await.unwrap());
        }

        let first = cache.peek_batch(RETRY_CEILING, 3).await.unwrap();
        let first_ids: Vec<_> = first.iter().map(|e| e.id).collect();
        assert_eq!(first_ids, ids[..3]);

        for entry in &first {
            cache.mark_delivered(entry.id).await.unwrap();
        }
        let rest: Vec<_> = cache
            .peek_batch(RETRY_CEILING, 3)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(rest, ids[3..]);
    }

    #[tokio::test]
    async fn test_failed_entries_keep_fifo_position() {
        let (_dir, cache) = temp_cache().await;
        let old = cache.enqueue(&record(1)).await.unwrap();
        cache.mark_failed(old).await.unwrap();
        cache.enqueue(&record(2)).await.unwrap();

        let batch = cache.peek_batch(RETRY_CEILING, 1).await.unwrap();
        assert_eq!(batch[0].id, old);
        assert_eq!(batch[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_acknowledgement_is_idempotent() {
        let (_dir, cache) = temp_cache().await;
        let id = cache.enqueue(&record(1)).await.unwrap();

        assert!(cache.mark_delivered(id).await.unwrap());
        assert!(!cache.mark_delivered(id).await.unwrap());
        assert!(!cache.mark_failed(id).await.unwrap());
        assert!(!cache.mark_failed(EntryId(9_999)).await.unwrap());
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_retry_ceiling_excludes_but_keeps_entry() {
        let (_dir, cache) = temp_cache().await;
        let id = cache.enqueue(&record(1)).await.unwrap();

        for _ in 0..RETRY_CEILING - 1 {
            cache.mark_failed(id).await.unwrap();
        }
        assert_eq!(cache.peek_batch(RETRY_CEILING, 10).await.unwrap().len(), 1);

        cache.mark_failed(id).await.unwrap();
        assert!(cache.peek_batch(RETRY_CEILING, 10).await.unwrap().is_empty());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.stuck_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let (_dir, cache) = temp_cache().await;
        let first = cache.enqueue(&record(1)).await.unwrap();
        cache.mark_delivered(first).await.unwrap();

        let second = cache.enqueue(&record(1)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let cache = DurableCache::open(&path).await.unwrap();
        let id = cache.enqueue(&record(7)).await.unwrap();
        cache.mark_failed(id).await.unwrap();
        cache.close().await;

        let reopened = DurableCache::open(&path).await.unwrap();
        let entries = reopened.peek_batch(RETRY_CEILING, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].retry_count, 1);
        assert_eq!(entries[0].record, record(7));
    }

    #[tokio::test]
    async fn test_nan_reading_is_queued() {
        let (_dir, cache) = temp_cache().await;
        let nan = Record::with_timestamp("sensor-nan", 1, f64::NAN, 50.0, 1);

        let id = cache.enqueue(&nan).await.unwrap();

        let entries = cache.peek_batch(RETRY_CEILING, 10).await.unwrap();
        assert_eq!(entries[0].id, id);
        assert!(entries[0].record.temperature.is_nan());
        assert_eq!(entries[0].record.humidity, 50.0);
    }

    #[tokio::test]
    async fn test_undecodable_row_does_not_block_queue() {
        let (_dir, cache) = temp_cache().await;
        sqlx::query(
            "INSERT INTO data_cache (sensor_name, slave_id, temperature, humidity, timestamp_ms, enqueued_at_ms) \
             VALUES ('bad', 300, 1.0, 2.0, 1, 1)",
        )
        .execute(cache.pool())
        .await
        .unwrap();
        let good = cache.enqueue(&record(1)).await.unwrap();

        let batch = cache.peek_batch(RETRY_CEILING, 1).await.unwrap();
        assert!(batch.is_empty());
        let batch = cache.peek_batch(RETRY_CEILING, 1).await.unwrap();
        assert_eq!(batch[0].id, good);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.stuck_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_operations() {
        let (_dir, cache) = temp_cache().await;
        cache.close().await;

        assert!(matches!(cache.enqueue(&record(1)).await, Err(CacheError::Closed)));
        assert!(matches!(cache.stats().await, Err(CacheError::Closed)));
    }
}
