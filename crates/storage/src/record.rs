//! Measurement Record

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One measurement emitted by the collection layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Configured sensor name
    pub sensor_name: String,
    /// Modbus slave address of the device
    pub slave_id: u8,
    /// Scaled temperature reading (°C)
    pub temperature: f64,
    /// Scaled relative humidity reading (%)
    pub humidity: f64,
    /// Capture time, Unix epoch milliseconds (UTC)
    #[serde(default = "now_ms")]
    pub timestamp_ms: i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Record {
    /// Create a record captured now
    pub fn new(sensor_name: impl Into<String>, slave_id: u8, temperature: f64, humidity: f64) -> Self {
        Self::with_timestamp(sensor_name, slave_id, temperature, humidity, now_ms())
    }

    /// Create a record with an explicit capture time
    pub fn with_timestamp(
        sensor_name: impl Into<String>,
        slave_id: u8,
        temperature: f64,
        humidity: f64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            slave_id,
            temperature,
            humidity,
            timestamp_ms,
        }
    }

    /// Capture time as a UTC datetime (falls back to the epoch if out of range)
    pub fn captured_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_default()
    }
}
