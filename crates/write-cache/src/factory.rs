//! Backend Factory
//!
//! Maps a storage configuration to a constructed backend, wrapped by the
//! write-behind cache when caching is enabled.

use crate::caching::{CacheStatsHandle, CachingStorageBackend};
use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use storage::{
    CsvBackend, CsvConfig, InfluxBackend, InfluxConfig, MemoryBackend, MemoryConfig,
    SqliteBackend, SqliteConfig, StorageBackend, StorageError,
};
use tracing::info;

/// Which backend records are persisted to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Influxdb,
    Csv,
    Memory,
    /// Discard records; no backend is built
    #[serde(rename = "none")]
    Disabled,
}

/// Storage section of the application config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_type: StorageKind,
    pub sqlite_config: SqliteConfig,
    pub influxdb_config: InfluxConfig,
    pub csv_config: CsvConfig,
    pub memory_config: MemoryConfig,
    pub cache_config: CacheConfig,
}

/// A constructed backend plus the cache stats view when caching is on
pub struct BuiltStorage {
    pub backend: Box<dyn StorageBackend>,
    pub cache_stats: Option<CacheStatsHandle>,
}

/// Build the configured backend, or `None` for `storage_type: none`
pub async fn build_storage(config: &StorageConfig) -> Result<Option<BuiltStorage>, StorageError> {
    let target: Box<dyn StorageBackend> = match config.storage_type {
        StorageKind::Sqlite => Box::new(SqliteBackend::open(&config.sqlite_config).await?),
        StorageKind::Influxdb => Box::new(InfluxBackend::new(&config.influxdb_config)?),
        StorageKind::Csv => Box::new(CsvBackend::open(&config.csv_config).await?),
        StorageKind::Memory => Box::new(MemoryBackend::new(&config.memory_config)),
        StorageKind::Disabled => {
            info!("Storage disabled");
            return Ok(None);
        }
    };
    info!("Storage backend: {}", target.name());

    if !config.cache_config.enabled {
        return Ok(Some(BuiltStorage {
            backend: target,
            cache_stats: None,
        }));
    }

    let cached = CachingStorageBackend::new(target, &config.cache_config).await?;
    let cache_stats = Some(cached.stats_handle());
    Ok(Some(BuiltStorage {
        backend: Box::new(cached),
        cache_stats,
    }))
}
