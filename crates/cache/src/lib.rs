//! Two-tier cache for the database catalog pipeline
//!
//! This crate provides:
//! - A deterministic key deriver for operation identities
//! - A bounded, TTL-expiring in-memory tier with LRU eviction
//! - A persistent disk tier with a JSON metadata table
//! - A manager that routes results between the tiers by size
//!
//! Every cache failure degrades to a miss, so callers can always fall back
//! to recomputing the value.

pub mod config;
pub mod errors;
pub mod keys;
pub mod manager;
pub mod memory;
pub mod storage;

pub use config::{CacheConfig, CacheConfigBuilder, CacheConfigLoader, ConfigSource};
pub use errors::{CacheError, Error, RecoveryHint, Result};
pub use keys::{derive_key, KeyParams};
pub use manager::{CacheManager, CacheManagerBuilder, CacheStatistics, ManagerStats, Tier};
pub use memory::{MemoryStats, MemoryTier};
pub use storage::{DiskStats, DiskTier, EntryMetadata};
