//! Record Ingest Loop
//!
//! Reads one JSON document per line: an object is saved as a single record,
//! an array as a batch.

use serde::Deserialize;
use storage::{Record, StorageBackend, StorageError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Batch(Vec<Record>),
    Single(Record),
}

/// Counters for one ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records accepted by the backend
    pub saved: usize,
    /// Records the backend refused (not durable)
    pub failed: usize,
    /// Lines that did not parse
    pub malformed: usize,
}

/// Feed every line of `reader` into `backend` until EOF
pub async fn run<R>(reader: R, backend: &mut dyn StorageBackend) -> Result<IngestSummary, StorageError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (result, count) = match serde_json::from_str::<Payload>(line) {
            Ok(Payload::Single(record)) => (backend.save(&record).await, 1),
            Ok(Payload::Batch(records)) => (backend.save_batch(&records).await, records.len()),
            Err(e) => {
                warn!("Skipping malformed line {}: {}", line_no, e);
                summary.malformed += 1;
                continue;
            }
        };

        match result {
            Ok(()) => {
                summary.saved += count;
                debug!("Line {}: saved {} records", line_no, count);
            }
            Err(e) => {
                summary.failed += count;
                error!("Line {}: {} records not saved: {}", line_no, count, e);
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryBackend;

    #[tokio::test]
    async fn test_single_and_batch_lines() {
        let input = concat!(
            r#"{"sensor_name":"a","slave_id":1,"temperature":20.1,"humidity":40.0,"timestamp_ms":1}"#,
            "\n\n",
            r#"[{"sensor_name":"b","slave_id":2,"temperature":21.0,"humidity":41.0},"#,
            r#"{"sensor_name":"c","slave_id":3,"temperature":22.0,"humidity":42.0}]"#,
            "\nnot json\n",
        );
        let observer = MemoryBackend::default();
        let mut backend = observer.clone();

        let summary = run(input.as_bytes(), &mut backend).await.unwrap();

        assert_eq!(summary, IngestSummary { saved: 3, failed: 0, malformed: 1 });
        let names: Vec<_> = observer.records().into_iter().map(|r| r.sensor_name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_backend_errors_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = storage::CsvBackend::open(&storage::CsvConfig {
            file_path: dir.path().join("out.csv").to_string_lossy().into_owned(),
        })
        .await
        .unwrap();
        backend.close().await.unwrap();

        let input = r#"{"sensor_name":"a","slave_id":1,"temperature":1.0,"humidity":2.0}"#;
        let summary = run(input.as_bytes(), &mut backend).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.saved, 0);
    }
}
