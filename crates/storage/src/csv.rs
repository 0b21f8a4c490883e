//! CSV Flat-File Backend

use crate::{Record, StorageBackend, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

const HEADER: &str = "timestamp,sensor_name,slave_id,temperature,humidity\n";

/// CSV backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Output file path
    pub file_path: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            file_path: "sensor_data.csv".to_string(),
        }
    }
}

/// Append-only CSV backend
pub struct CsvBackend {
    path: PathBuf,
    file: Option<File>,
}

impl CsvBackend {
    /// Open the file for appending, writing the header if it is new
    pub async fn open(config: &CsvConfig) -> Result<Self, StorageError> {
        let path = PathBuf::from(&config.file_path);
        let is_new = !tokio::fs::try_exists(&path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if is_new {
            file.write_all(HEADER.as_bytes()).await?;
            file.flush().await?;
        }

        info!("CSV backend appending to {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Path of the output file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn append(&mut self, records: &[Record]) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;

        let mut buf = String::new();
        for record in records {
            buf.push_str(&format_row(record));
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Render one record as a CSV line
fn format_row(record: &Record) -> String {
    format!(
        "{},{},{},{:.1},{:.1}\n",
        record.captured_at().format("%Y-%m-%d %H:%M:%S"),
        escape_field(&record.sensor_name),
        record.slave_id,
        record.temperature,
        record.humidity,
    )
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[async_trait]
impl StorageBackend for CsvBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.append(std::slice::from_ref(record)).await
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        self.append(records).await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut file) = self.file.take() {
            file.sync_all().await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        // 2023-11-14 22:13:20 UTC
        let record = Record::with_timestamp("hall", 4, 23.456, 51.04, 1_700_000_000_000);
        assert_eq!(format_row(&record), "2023-11-14 22:13:20,hall,4,23.5,51.0\n");
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig {
            file_path: dir.path().join("out.csv").to_string_lossy().into_owned(),
        };

        let mut backend = CsvBackend::open(&config).await.unwrap();
        backend.save(&Record::new("a", 1, 1.0, 2.0)).await.unwrap();
        backend.close().await.unwrap();

        let mut backend = CsvBackend::open(&config).await.unwrap();
        backend
            .save_batch(&[Record::new("b", 2, 3.0, 4.0), Record::new("c", 3, 5.0, 6.0)])
            .await
            .unwrap();
        backend.close().await.unwrap();

        let contents = tokio::fs::read_to_string(&config.file_path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER.trim_end());
        assert!(lines[3].contains(",c,3,5.0,6.0"));
    }

    #[tokio::test]
    async fn test_save_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let config = CsvConfig {
            file_path: dir.path().join("out.csv").to_string_lossy().into_owned(),
        };
        let mut backend = CsvBackend::open(&config).await.unwrap();
        backend.close().await.unwrap();

        let result = backend.save(&Record::new("a", 1, 0.0, 0.0)).await;
        assert!(matches!(result, Err(StorageError::Closed)));
    }
}
