//! Cache manager builder and initialization

use super::CacheManager;
use crate::config::CacheConfig;
use crate::errors::Result;
use crate::storage::DiskTier;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for CacheManager
#[derive(Debug, Default)]
pub struct CacheManagerBuilder {
    config: Option<CacheConfig>,
    cache_dir: Option<PathBuf>,
    memory_ttl: Option<Duration>,
    memory_max_entries: Option<usize>,
    disk_ttl_hours: Option<u64>,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a full configuration; individual setters still override it
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    pub fn with_memory_max_entries(mut self, max_entries: usize) -> Self {
        self.memory_max_entries = Some(max_entries);
        self
    }

    pub fn with_disk_ttl_hours(mut self, hours: u64) -> Self {
        self.disk_ttl_hours = Some(hours);
        self
    }

    /// Build the manager, degrading to memory-only mode if the disk tier
    /// cannot be opened. Invalid fields are reset to their defaults. Either
    /// failure is logged once here.
    pub fn build(self) -> CacheManager {
        let config = self.build_config();

        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Invalid cache configuration, resetting invalid fields"
                );
                config.repaired()
            }
        };

        self.build_with_fallback(config)
    }

    /// Build the manager, failing if the configuration is invalid or the
    /// disk tier cannot be opened
    pub fn try_build(self) -> Result<CacheManager> {
        let config = self.build_config();
        config.validate()?;

        let disk = if config.disk_enabled {
            Some(DiskTier::open(&config.cache_dir, config.disk_ttl_hours)?)
        } else {
            None
        };
        Ok(CacheManager::from_parts(config, disk))
    }

    fn build_with_fallback(self, config: CacheConfig) -> CacheManager {
        if !config.disk_enabled {
            return CacheManager::from_parts(config, None);
        }

        match DiskTier::open(&config.cache_dir, config.disk_ttl_hours) {
            Ok(disk) => CacheManager::from_parts(config, Some(disk)),
            Err(e) => {
                tracing::error!(
                    cache_dir = %config.cache_dir.display(),
                    error = %e,
                    hint = %e.recovery_hint(),
                    "Disk cache unavailable, running in memory-only mode"
                );
                CacheManager::from_parts(config, None)
            }
        }
    }

    fn build_config(&self) -> CacheConfig {
        let mut config = self.config.clone().unwrap_or_default();
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(ttl) = self.memory_ttl {
            config.memory_ttl = ttl;
        }
        if let Some(max_entries) = self.memory_max_entries {
            config.memory_max_entries = max_entries;
        }
        if let Some(hours) = self.disk_ttl_hours {
            config.disk_ttl_hours = hours;
        }
        config
    }
}
