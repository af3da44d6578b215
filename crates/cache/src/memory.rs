//! Bounded in-process cache with absolute TTL and LRU eviction
//!
//! Expired entries are swept lazily at the start of every `get` and `set`.
//! When an insert would exceed the capacity, the least recently accessed
//! entries are evicted until one slot is free. Recency ties are broken by
//! a logical access counter, so the entry touched first goes first.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached value and the instant it was created
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

/// When a key was last read or written
#[derive(Debug, Clone, Copy)]
struct AccessRecord {
    at: Instant,
    seq: u64,
}

/// Memory tier statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    /// Entries past their TTL that have not been swept yet
    pub expired_entries: usize,
    pub hits: u64,
    pub requests: u64,
    pub hit_ratio: f64,
}

/// Bounded TTL cache
///
/// Values are handed out as clones; callers never get a reference into the
/// table.
#[derive(Debug)]
pub struct MemoryTier<V> {
    ttl: Duration,
    max_size: usize,
    entries: HashMap<String, CacheEntry<V>>,
    access: HashMap<String, AccessRecord>,
    access_seq: u64,
    hits: u64,
    requests: u64,
}

impl<V: Clone> MemoryTier<V> {
    /// Create a tier holding at most `max_size` entries for `ttl` each.
    /// A `max_size` of zero is treated as one.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            entries: HashMap::new(),
            access: HashMap::new(),
            access_seq: 0,
            hits: 0,
            requests: 0,
        }
    }

    /// Look up a live entry, bumping its recency on a hit
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.evict_expired(now);
        self.requests += 1;

        let entry = self.entries.get(key)?;
        if self.is_expired(entry, now) {
            return None;
        }
        let value = entry.value.clone();

        self.hits += 1;
        self.touch(key, now);
        Some(value)
    }

    /// Insert or replace a value; its TTL starts now
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        self.evict_expired(now);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: now,
            },
        );
        self.touch(&key, now);
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&mut self, key: &str) -> bool {
        self.access.remove(key);
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access.clear();
    }

    /// Drop every expired entry now; returns how many were removed
    pub fn sweep(&mut self) -> usize {
        self.evict_expired(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> MemoryStats {
        let now = Instant::now();
        let expired_entries = self
            .entries
            .values()
            .filter(|entry| self.is_expired(entry, now))
            .count();
        let hit_ratio = if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        };

        MemoryStats {
            size: self.entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            expired_entries,
            hits: self.hits,
            requests: self.requests,
            hit_ratio,
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.created_at) > self.ttl
    }

    fn touch(&mut self, key: &str, now: Instant) {
        self.access_seq += 1;
        let record = AccessRecord {
            at: now,
            seq: self.access_seq,
        };
        match self.access.get_mut(key) {
            Some(existing) => *existing = record,
            None => {
                self.access.insert(key.to_string(), record);
            }
        }
    }

    fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.created_at) <= ttl);
        let entries = &self.entries;
        self.access.retain(|key, _| entries.contains_key(key));

        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired memory cache entries");
        }
        removed
    }

    fn evict_lru(&mut self) {
        let excess = (self.entries.len() + 1).saturating_sub(self.max_size);
        if excess == 0 {
            return;
        }

        let mut by_recency: Vec<(&String, &AccessRecord)> = self.access.iter().collect();
        by_recency.sort_by_key(|(_, record)| (record.at, record.seq));
        let victims: Vec<String> = by_recency
            .into_iter()
            .take(excess)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &victims {
            self.entries.remove(key);
            self.access.remove(key);
            tracing::debug!(key = %key, "Evicted least recently used memory cache entry");
        }
    }
}
