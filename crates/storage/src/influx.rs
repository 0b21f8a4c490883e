//! InfluxDB v2 Backend
//!
//! Writes records as line protocol to the `/api/v2/write` endpoint.

use crate::{Record, StorageBackend, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const MEASUREMENT: &str = "sensor_data";

/// InfluxDB backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Server base URL
    pub url: String,
    /// API token
    pub token: String,
    /// Organization name
    pub org: String,
    /// Destination bucket
    pub bucket: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "my-org".to_string(),
            bucket: "sensor-data".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Time-series backend
pub struct InfluxBackend {
    client: reqwest::Client,
    write_url: String,
    config: InfluxConfig,
}

impl InfluxBackend {
    /// Create a backend; no request is made until the first write
    pub fn new(config: &InfluxConfig) -> Result<Self, StorageError> {
        if config.bucket.is_empty() || config.org.is_empty() {
            return Err(StorageError::ConfigError(
                "influxdb org and bucket must be set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let write_url = format!("{}/api/v2/write", config.url.trim_end_matches('/'));

        info!("InfluxDB backend targeting {} (bucket {})", write_url, config.bucket);
        Ok(Self {
            client,
            write_url,
            config: config.clone(),
        })
    }

    async fn write(&self, body: String) -> Result<(), StorageError> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::RemoteError(format!("HTTP {}: {}", status, detail)));
        }
        Ok(())
    }
}

/// Render one record as a line-protocol point
fn line_protocol(record: &Record) -> String {
    format!(
        "{},sensor={},slave_id={} temperature={},humidity={} {}",
        MEASUREMENT,
        escape_tag(&record.sensor_name),
        record.slave_id,
        record.temperature,
        record.humidity,
        record.timestamp_ms,
    )
}

/// Tag values escape commas, equals signs and spaces
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl StorageBackend for InfluxBackend {
    async fn save(&mut self, record: &Record) -> Result<(), StorageError> {
        self.write(line_protocol(record)).await
    }

    async fn save_batch(&mut self, records: &[Record]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = records
            .iter()
            .map(line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        self.write(body).await?;
        debug!("Wrote {} points", records.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}
