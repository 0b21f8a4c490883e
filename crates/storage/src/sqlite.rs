//! SQLite Backend

use crate::{Record, StorageBackend, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

const INSERT_SQL: &str = "INSERT INTO sensor_data (timestamp_ms, sensor_name, slave_id, temperature, humidity) \
                          VALUES (?, ?, ?, ?, ?)";

/// SQLite backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path
    pub db_path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: "sensor_data.db".to_string(),
        }
    }
}

/// Relational backend storing records in a local SQLite database
pub struct SqliteBackend {
    pool: SqlitePool,
    closed: bool,
}

impl SqliteBackend {
    /// Open (or create) the database and its schema
    pub async fn open(config: &SqliteConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                sensor_name TEXT NOT NULL,
                slave_id INTEGER,
                temperature REAL,
                humidity REAL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_timestamp ON sensor_data(timestamp_ms)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sensor_name ON sensor_data(sensor_name)")
            .execute(&pool)
            .await?;

        info!("SQLite backend ready at {}", config.db_path);
        Ok(Self { pool, closed: false })
    }

    /// Most recent records, newest first
    pub async fn recent(&self, limit: usize, offset: usize) -> Result<Vec<Record>, StorageError> {
        let rows = sqlx::query(
            "SELECT timestamp_ms, sensor_name, slave_id, temperature, humidity \
             FROM sensor_data ORDER BY timestamp_ms DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Record, StorageError> {
                let slave_id: i64 = row.try_get("slave_id")?;
                Ok(Record {
                    sensor_name: row.try_get("sensor_name")?,
                    slave_id: u8::try_from(slave_id).map_err(|_| {
                        StorageError::DatabaseError(format!("slave_id {} out of range", slave_id))
                    })?,
                    // NaN readings come back as NULL
                    temperature: row.try_get::<Option<f64>, _>("temperature")?.unwrap_or(f64::NAN),
                    humidity: row.try_get::<Option<f64>, _>("humidity")?.unwrap_or(f64::NAN),
                    timestamp_ms: row.try_get("timestamp_ms")?,
                })
            })
            .collect()
    }

    /// Total number of stored records
    pub async fn count(&self) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sensor_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.ensure_open()?;
        sqlx::query(INSERT_SQL)
            .bind(record.timestamp_ms)
            .bind(record.sensor_name.as_str())
            .bind(i64::from(record.slave_id))
            .bind(record.temperature)
            .bind(record.humidity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(INSERT_SQL)
                .bind(record.timestamp_ms)
                .bind(record.sensor_name.as_str())
                .bind(i64::from(record.slave_id))
                .bind(record.temperature)
                .bind(record.humidity)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("Inserted batch of {} records", records.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if !self.closed {
            self.closed = true;
            self.pool.close().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
