//! Cache statistics tracking and reporting

use crate::manager::Tier;
use crate::memory::MemoryStats;
use crate::storage::DiskStats;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Counters kept by the manager across both tiers
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub memory_writes: u64,
    pub disk_writes: u64,
    pub errors: u64,
    pub last_cleanup: Option<SystemTime>,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits() as f64 / total as f64) * 100.0
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.hits() + self.misses + self.memory_writes + self.disk_writes
    }
}

/// Full snapshot returned by `CacheManager::get_stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub memory: MemoryStats,
    /// Absent when running in memory-only mode
    pub disk: Option<DiskStats>,
    pub manager: CacheStatistics,
}

/// Thread-safe statistics container
#[derive(Debug, Default)]
pub(crate) struct StatsContainer {
    stats: RwLock<CacheStatistics>,
}

impl StatsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.stats.write().memory_hits += 1;
    }

    pub fn record_disk_hit(&self) {
        self.stats.write().disk_hits += 1;
    }

    pub fn record_miss(&self) {
        self.stats.write().misses += 1;
    }

    pub fn record_write(&self, tier: Tier) {
        let mut stats = self.stats.write();
        match tier {
            Tier::Memory => stats.memory_writes += 1,
            Tier::Disk => stats.disk_writes += 1,
        }
    }

    pub fn record_error(&self) {
        self.stats.write().errors += 1;
    }

    pub fn record_cleanup(&self) {
        self.stats.write().last_cleanup = Some(SystemTime::now());
    }

    pub fn get_snapshot(&self) -> CacheStatistics {
        self.stats.read().clone()
    }
}
