//! Cache Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Write-behind cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Wrap the backend with the durable cache
    pub enabled: bool,
    /// Cache database file path
    pub db_path: String,
    /// Seconds between flush passes (floor 1)
    pub flush_interval: u64,
    /// Max entries per flush pass (floor 1)
    pub batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: "sensor_cache.db".to_string(),
            flush_interval: 10,
            batch_size: 100,
        }
    }
}

impl CacheConfig {
    /// Time between flush passes
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval.max(1))
    }

    /// Entries per flush pass
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Cache database location, defaulting an empty path
    pub fn db_path(&self) -> &str {
        if self.db_path.is_empty() {
            "sensor_cache.db"
        } else {
            &self.db_path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_fields() {
        let config: CacheConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.batch_size(), 100);
        assert_eq!(config.db_path(), "sensor_cache.db");
    }

    #[test]
    fn test_floors() {
        let config = CacheConfig {
            flush_interval: 0,
            batch_size: 0,
            db_path: String::new(),
            ..Default::default()
        };
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.db_path(), "sensor_cache.db");
    }
}
