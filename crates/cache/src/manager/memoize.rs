//! Compute-if-absent helpers
//!
//! These return a cached value when there is one and otherwise run the
//! producer and store its result. They do not deduplicate: two callers
//! missing on the same key at the same time will both run their producer.

use super::CacheManager;
use crate::keys::{derive_key, KeyParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;

impl CacheManager {
    /// Return the cached value for `key`, or compute and store it
    pub fn get_or_compute<T, F>(&self, key: &str, producer: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(cached) = self.get(key) {
            return cached;
        }
        let value = producer();
        self.set(key, &value);
        value
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for fallible
    /// producers; errors are passed through and never cached
    pub fn try_get_or_compute<T, E, F>(&self, key: &str, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let value = producer()?;
        self.set(key, &value);
        Ok(value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for producers that
    /// are futures
    pub async fn get_or_compute_async<T, F, Fut>(&self, key: &str, producer: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(cached) = self.get(key) {
            return cached;
        }
        let value = producer().await;
        self.set(key, &value);
        value
    }

    /// Memoize a named operation in the memory tier only
    pub fn memoize<T, F>(&self, name: &str, params: &KeyParams, producer: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let key = derive_key(name, params);

        let cached = self.memory.lock().get(&key);
        if let Some(json) = cached {
            match serde_json::from_value(json) {
                Ok(cached) => {
                    self.stats.record_memory_hit();
                    tracing::debug!(operation = name, "Memoized result hit");
                    return cached;
                }
                Err(e) => {
                    self.stats.record_error();
                    tracing::warn!(
                        operation = name,
                        error = %e,
                        "Memoized result has unexpected shape"
                    );
                }
            }
        }
        self.stats.record_miss();

        let value = producer();
        match serde_json::to_value(&value) {
            Ok(json) => {
                self.memory.lock().set(key, json);
                self.stats.record_write(super::Tier::Memory);
            }
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(operation = name, error = %e, "Result cannot be memoized");
            }
        }
        value
    }

    /// Memoize a named operation in the disk tier only
    ///
    /// Without a disk tier the producer simply runs every time.
    pub fn memoize_persistent<T, F>(&self, name: &str, params: &KeyParams, producer: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let Some(disk) = &self.disk else {
            return producer();
        };
        let key = derive_key(name, params);

        let cached = disk.lock().get(&key);
        if let Some(cached) = cached {
            self.stats.record_disk_hit();
            tracing::debug!(operation = name, "Persistent memoized result hit");
            return cached;
        }
        self.stats.record_miss();

        let value = producer();
        let mut tags = Map::new();
        tags.insert("func".to_string(), Value::from(name));
        tags.insert("rows".to_string(), Value::from(row_count(&value)));
        let written = disk.lock().set(&key, &value, Some(tags));
        if written {
            self.stats.record_write(super::Tier::Disk);
        } else {
            self.stats.record_error();
        }
        value
    }
}

/// Number of rows or fields in a result, or zero for scalars
fn row_count<T: Serialize>(value: &T) -> usize {
    match serde_json::to_value(value) {
        Ok(Value::Array(items)) => items.len(),
        Ok(Value::Object(fields)) => fields.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CacheConfigBuilder};
    use crate::storage::METADATA_FILE;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> CacheManager {
        CacheManager::new(CacheConfigBuilder::new().with_cache_dir(dir.path()).build())
    }

    #[test]
    fn test_get_or_compute_runs_producer_once() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir);
        let calls = Cell::new(0);

        for _ in 0..3 {
            let value: Vec<u32> = cache.get_or_compute("k", || {
                calls.set(calls.get() + 1);
                vec![1, 2, 3]
            });
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = CacheManager::memory_only(CacheConfig::default());

        let failed: Result<Vec<u8>, String> =
            cache.try_get_or_compute("k", || Err("connection reset".to_string()));
        assert!(failed.is_err());
        assert_eq!(cache.get::<Vec<u8>>("k"), None);

        let ok: Result<Vec<u8>, String> = cache.try_get_or_compute("k", || Ok(vec![9]));
        assert_eq!(ok, Ok(vec![9]));

        let cached: Result<Vec<u8>, String> =
            cache.try_get_or_compute("k", || Err("not called".to_string()));
        assert_eq!(cached, Ok(vec![9]));
    }

    #[tokio::test]
    async fn test_async_producer() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir);

        let first: u64 = cache.get_or_compute_async("k", || async { 41 + 1 }).await;
        let second: u64 = cache.get_or_compute_async("k", || async { 0 }).await;
        assert_eq!(first, 42);
        assert_eq!(second, 42);
    }

    #[test]
    fn test_memoize_uses_memory_only() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir);
        let params = KeyParams::new().arg("table", "users");
        let calls = Cell::new(0);

        for _ in 0..2 {
            let count: u64 = cache.memoize("row_count", &params, || {
                calls.set(calls.get() + 1);
                1234
            });
            assert_eq!(count, 1234);
        }

        assert_eq!(calls.get(), 1);
        let stats = cache.get_stats();
        assert_eq!(stats.memory.size, 1);
        assert_eq!(stats.disk.unwrap().entries, 0);
    }

    #[test]
    fn test_memoize_distinguishes_arguments() {
        let cache = CacheManager::memory_only(CacheConfig::default());
        let users = KeyParams::new().arg("table", "users");
        let orders = KeyParams::new().arg("table", "orders");

        let a: String = cache.memoize("describe", &users, || "users".to_string());
        let b: String = cache.memoize("describe", &orders, || "orders".to_string());
        assert_eq!(a, "users");
        assert_eq!(b, "orders");
    }

    #[test]
    fn test_memoize_persistent_survives_restart() {
        let dir = TempDir::new().unwrap();
        let params = KeyParams::new().arg("table", "users").arg("limit", &1000);
        let rows: Vec<Vec<String>> = vec![vec!["a".into()], vec!["b".into()]];

        {
            let cache = manager(&dir);
            let sampled = cache.memoize_persistent("sample_table", &params, || rows.clone());
            assert_eq!(sampled, rows);
            assert_eq!(cache.get_stats().memory.size, 0);
        }

        let cache = manager(&dir);
        let sampled: Vec<Vec<String>> = cache
            .memoize_persistent("sample_table", &params, || unreachable!("value is on disk"));
        assert_eq!(sampled, rows);

        let json: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(METADATA_FILE)).unwrap())
                .unwrap();
        let record = json.as_object().unwrap().values().next().unwrap();
        assert_eq!(record["metadata"]["func"], "sample_table");
        assert_eq!(record["metadata"]["rows"], 2);
    }

    #[test]
    fn test_memoize_persistent_counts_failed_writes() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let cache = CacheManager::new(CacheConfigBuilder::new().with_cache_dir(&cache_dir).build());
        std::fs::remove_dir_all(&cache_dir).unwrap();

        let rows: Vec<u8> = cache.memoize_persistent("sample", &KeyParams::new(), || vec![1, 2]);
        assert_eq!(rows, vec![1, 2]);

        let counters = cache.get_stats().manager;
        assert_eq!(counters.disk_writes, 0);
        assert_eq!(counters.errors, 1);
    }

    #[test]
    fn test_memoize_persistent_without_disk_always_computes() {
        let cache = CacheManager::memory_only(CacheConfig::default());
        let params = KeyParams::new();
        let calls = Cell::new(0);

        for _ in 0..2 {
            let _: u8 = cache.memoize_persistent("op", &params, || {
                calls.set(calls.get() + 1);
                1
            });
        }
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_row_count() {
        assert_eq!(row_count(&vec![1, 2, 3]), 3);
        assert_eq!(row_count(&serde_json::json!({"a": 1, "b": 2})), 2);
        assert_eq!(row_count(&5u8), 0);
    }
}
