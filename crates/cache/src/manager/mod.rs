//! Unified two-tier cache manager
//!
//! Lookups probe the memory tier first and then the disk tier. Stores are
//! routed by size: short sequences stay in memory, everything else goes to
//! disk, falling back to memory when a disk write fails. Each tier sits
//! behind its own lock so a manager can be shared across threads; no lock
//! is held while a caller's producer runs.

mod builder;
mod keygen;
mod memoize;
mod statistics;

pub use builder::CacheManagerBuilder;
pub use keygen::{profile_key, query_key, PROFILE_OPERATION, QUERY_OPERATION};
pub use statistics::{CacheStatistics, ManagerStats};

use crate::config::CacheConfig;
use crate::memory::MemoryTier;
use crate::storage::DiskTier;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use statistics::StatsContainer;

/// Which tier a stored value landed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Disk,
}

/// Entry point for every cache consumer
pub struct CacheManager {
    config: CacheConfig,
    memory: Mutex<MemoryTier<Value>>,
    disk: Option<Mutex<DiskTier>>,
    stats: StatsContainer,
}

impl CacheManager {
    /// Create a manager, falling back to memory-only mode if the disk tier
    /// cannot be opened
    pub fn new(config: CacheConfig) -> Self {
        CacheManagerBuilder::new().with_config(config).build()
    }

    /// Create a manager that never touches the filesystem
    pub fn memory_only(config: CacheConfig) -> Self {
        Self::from_parts(config, None)
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    pub(crate) fn from_parts(config: CacheConfig, disk: Option<DiskTier>) -> Self {
        let memory = MemoryTier::new(config.memory_ttl, config.memory_max_entries);
        Self {
            config,
            memory: Mutex::new(memory),
            disk: disk.map(Mutex::new),
            stats: StatsContainer::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether a disk tier is attached
    pub fn is_persistent(&self) -> bool {
        self.disk.is_some()
    }

    /// Look up `key` in memory, then on disk
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.memory_get(key) {
            self.stats.record_memory_hit();
            return Some(value);
        }

        if let Some(value) = self.disk_get(key) {
            self.stats.record_disk_hit();
            return Some(value);
        }

        self.stats.record_miss();
        None
    }

    /// Store `value` under `key` in the tier its size calls for
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Option<Tier> {
        self.set_with_tags(key, value, Map::new())
    }

    /// Like [`set`](Self::set), attaching tags if the value goes to disk
    pub fn set_with_tags<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: Map<String, Value>,
    ) -> Option<Tier> {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key, error = %e, "Value cannot be cached");
                return None;
            }
        };

        let tier = match &self.disk {
            Some(disk) if !self.fits_in_memory(&json) => {
                let written = disk.lock().set(key, &json, Some(tags));
                if written {
                    self.memory.lock().delete(key);
                    Tier::Disk
                } else {
                    self.stats.record_error();
                    tracing::warn!(key = %key, "Disk write failed, keeping value in memory");
                    self.store_in_memory(key, json);
                    Tier::Memory
                }
            }
            _ => {
                self.store_in_memory(key, json);
                Tier::Memory
            }
        };

        self.stats.record_write(tier);
        tracing::debug!(key = %key, ?tier, "Cached value");
        Some(tier)
    }

    /// Remove `key` from both tiers; returns whether either held it
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().delete(key);
        let on_disk = match &self.disk {
            Some(disk) => disk.lock().delete(key),
            None => false,
        };
        in_memory || on_disk
    }

    /// Cached result of `query` run with `params`
    pub fn get_query_result<T: DeserializeOwned>(
        &self,
        query: &str,
        params: Option<&[Value]>,
    ) -> Option<T> {
        self.get(&query_key(query, params))
    }

    /// Cache the result of `query` run with `params`
    pub fn set_query_result<T: Serialize + ?Sized>(
        &self,
        query: &str,
        result: &T,
        params: Option<&[Value]>,
    ) -> Option<Tier> {
        let mut tags = Map::new();
        tags.insert("query_length".to_string(), Value::from(query.len()));
        self.set_with_tags(&query_key(query, params), result, tags)
    }

    /// Cached profile of `table.column`
    pub fn get_profile<T: DeserializeOwned>(&self, table: &str, column: &str) -> Option<T> {
        self.get(&profile_key(table, column))
    }

    /// Cache the profile of `table.column`
    pub fn set_profile<T: Serialize + ?Sized>(
        &self,
        table: &str,
        column: &str,
        profile: &T,
    ) -> Option<Tier> {
        let mut tags = Map::new();
        tags.insert("table".to_string(), Value::from(table));
        tags.insert("column".to_string(), Value::from(column));
        self.set_with_tags(&profile_key(table, column), profile, tags)
    }

    /// Empty both tiers
    pub fn clear_all(&self) {
        self.memory.lock().clear();
        if let Some(disk) = &self.disk {
            disk.lock().clear();
        }
        tracing::info!("Cleared all caches");
    }

    /// Drop expired entries from both tiers; returns how many went away
    pub fn prune_expired(&self) -> usize {
        let mut removed = self.memory.lock().sweep();
        if let Some(disk) = &self.disk {
            removed += disk.lock().clear_expired();
        }
        self.stats.record_cleanup();
        removed
    }

    pub fn get_stats(&self) -> ManagerStats {
        ManagerStats {
            memory: self.memory.lock().stats(),
            disk: self.disk.as_ref().map(|disk| disk.lock().stats()),
            manager: self.stats.get_snapshot(),
        }
    }

    fn store_in_memory(&self, key: &str, json: Value) {
        self.memory.lock().set(key, json);
        // A stale disk copy would resurface once the memory entry expires.
        if let Some(disk) = &self.disk {
            disk.lock().delete(key);
        }
    }

    fn fits_in_memory(&self, value: &Value) -> bool {
        matches!(value, Value::Array(items) if items.len() < self.config.memory_result_threshold)
    }

    fn memory_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.memory.lock().get(key)?;
        match serde_json::from_value(json) {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Memory cache entry has unexpected shape"
                );
                None
            }
        }
    }

    fn disk_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.disk.as_ref()?.lock().get(key)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("persistent", &self.is_persistent())
            .finish()
    }
}
