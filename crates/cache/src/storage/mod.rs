//! Persistent cache tier
//!
//! Each entry lives in its own file, named by the SHA-256 of the caller's
//! key. The file is a small versioned bincode frame around the value's JSON
//! text, so self-describing types (`serde_json::Value`, untagged enums)
//! read back the same as plain structs. A JSON metadata table in the same directory records
//! creation time, last access, size and caller tags. Entries older than the
//! configured TTL are misses; they are only removed by `clear_expired`.
//!
//! Per-entry failures (unreadable payload, missing file, failed write) are
//! logged and reported as a miss or a no-op. They never reach the caller.

mod metadata;

pub use metadata::{EntryMetadata, MetadataTable};

use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the metadata table inside the cache directory
pub const METADATA_FILE: &str = "cache_metadata.json";

/// Extension of payload files
pub const PAYLOAD_EXTENSION: &str = "bin";

/// Frame version written at the start of every payload
const PAYLOAD_VERSION: u32 = 1;

/// On-disk payload frame
#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    version: u32,
    /// The value encoded as JSON text
    body: String,
}

/// Disk tier statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskStats {
    pub entries: usize,
    pub total_size_mb: f64,
    /// Entries past their TTL that `clear_expired` has not removed yet
    pub expired_entries: usize,
    pub ttl_hours: f64,
    pub cache_dir: String,
}

/// Disk-backed cache tier
#[derive(Debug)]
pub struct DiskTier {
    cache_dir: PathBuf,
    ttl: chrono::Duration,
    metadata: MetadataTable,
}

impl DiskTier {
    /// Open (creating if needed) a cache directory whose entries live for
    /// `ttl_hours`
    pub fn open(cache_dir: impl Into<PathBuf>, ttl_hours: u64) -> Result<Self> {
        Self::with_ttl(cache_dir, Duration::from_secs(ttl_hours.saturating_mul(3600)))
    }

    /// Open a cache directory with an arbitrary TTL
    pub fn with_ttl(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CacheError::Configuration {
            message: format!("disk cache TTL out of range: {e}"),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Use a smaller disk_ttl_hours".to_string(),
            },
        })?;

        std::fs::create_dir_all(&cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.clone(),
            operation: "create cache directory",
            source: e,
            recovery_hint: RecoveryHint::CheckPermissions {
                path: cache_dir.clone(),
            },
        })?;

        let metadata = MetadataTable::load(&cache_dir.join(METADATA_FILE));
        // Writing the table once up front surfaces an unwritable directory
        // at startup rather than on the first store.
        if !metadata.exists_on_disk() {
            metadata.save()?;
        }

        tracing::debug!(
            cache_dir = %cache_dir.display(),
            entries = metadata.len(),
            "Opened disk cache"
        );

        Ok(Self {
            cache_dir,
            ttl,
            metadata,
        })
    }

    /// Fetch a live entry, refreshing its last-access time
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let name = storage_name(key);
        let record = match self.metadata.get(&name) {
            Some(record) if record.original_key == key => record,
            _ => {
                tracing::debug!(key = %key, "Disk cache miss");
                return None;
            }
        };

        if record.is_expired(self.ttl, Utc::now()) {
            tracing::debug!(key = %key, "Disk cache entry expired");
            return None;
        }

        let value = match self.read_payload(key, &name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not read disk cache entry");
                return None;
            }
        };

        if let Some(record) = self.metadata.get_mut(&name) {
            record.last_accessed_at = Utc::now();
        }
        self.persist_metadata();

        tracing::debug!(key = %key, "Disk cache hit");
        Some(value)
    }

    /// Store a value with optional caller tags, replacing any previous entry.
    /// Returns whether the entry was written.
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        tags: Option<Map<String, Value>>,
    ) -> bool {
        match self.try_set(key, value, tags.unwrap_or_default()) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Could not write disk cache entry");
                false
            }
        }
    }

    /// Whether a live entry exists for `key`, without touching it
    pub fn contains(&self, key: &str) -> bool {
        let name = storage_name(key);
        match self.metadata.get(&name) {
            Some(record) => {
                record.original_key == key
                    && !record.is_expired(self.ttl, Utc::now())
                    && self.payload_path(&name).exists()
            }
            None => false,
        }
    }

    /// Remove an entry; returns whether it was present
    ///
    /// Keys the table does not list are a no-op and never touch the
    /// filesystem.
    pub fn delete(&mut self, key: &str) -> bool {
        let name = storage_name(key);
        if self.metadata.remove(&name).is_none() {
            return false;
        }
        self.remove_payload(&name);
        self.persist_metadata();
        true
    }

    /// Remove every entry older than the TTL; returns how many went away
    pub fn clear_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .metadata
            .iter()
            .filter(|(_, record)| record.is_expired(self.ttl, now))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            self.remove_payload(name);
            self.metadata.remove(name);
        }

        if !expired.is_empty() {
            self.persist_metadata();
            tracing::info!(count = expired.len(), "Cleared expired disk cache entries");
        }
        expired.len()
    }

    /// Remove every entry, including payload files the table no longer lists
    pub fn clear(&mut self) -> usize {
        let names: Vec<String> = self
            .metadata
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            self.remove_payload(name);
        }
        self.remove_orphaned_payloads();

        self.metadata.clear();
        self.persist_metadata();
        tracing::info!(count = names.len(), "Cleared disk cache");
        names.len()
    }

    pub fn stats(&self) -> DiskStats {
        let now = Utc::now();
        let total_bytes: u64 = self.metadata.iter().map(|(_, r)| r.size_bytes).sum();
        let expired_entries = self
            .metadata
            .iter()
            .filter(|(_, record)| record.is_expired(self.ttl, now))
            .count();

        DiskStats {
            entries: self.metadata.len(),
            total_size_mb: total_bytes as f64 / (1024.0 * 1024.0),
            expired_entries,
            ttl_hours: self.ttl.num_seconds() as f64 / 3600.0,
            cache_dir: self.cache_dir.display().to_string(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Path of the payload file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.payload_path(&storage_name(key))
    }

    fn try_set<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        tags: Map<String, Value>,
    ) -> Result<()> {
        let body = serde_json::to_string(value).map_err(|e| encode_error(key, Box::new(e)))?;
        let payload = Payload {
            version: PAYLOAD_VERSION,
            body,
        };
        let bytes = bincode::serialize(&payload).map_err(|e| encode_error(key, e))?;

        let name = storage_name(key);
        write_atomic(&self.payload_path(&name), &bytes)?;

        self.metadata.insert(
            name.clone(),
            EntryMetadata::new(key, bytes.len() as u64, tags),
        );
        if let Err(e) = self.metadata.save() {
            // Every payload must be listed in the table on disk.
            self.metadata.remove(&name);
            self.remove_payload(&name);
            return Err(e);
        }

        tracing::debug!(key = %key, size_bytes = bytes.len(), "Stored disk cache entry");
        Ok(())
    }

    fn read_payload<T: DeserializeOwned>(&self, key: &str, name: &str) -> Result<T> {
        let path = self.payload_path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Corruption {
                    key: key.to_string(),
                    reason: "metadata exists but payload file is missing".to_string(),
                    recovery_hint: RecoveryHint::ClearAndRetry,
                });
            }
            Err(e) => {
                return Err(CacheError::Io {
                    path,
                    operation: "read cache payload",
                    source: e,
                    recovery_hint: RecoveryHint::Retry {
                        after: Duration::from_millis(100),
                    },
                });
            }
        };

        let payload: Payload =
            bincode::deserialize(&bytes).map_err(|e| CacheError::from(e).for_key(key))?;
        if payload.version != PAYLOAD_VERSION {
            return Err(CacheError::Corruption {
                key: key.to_string(),
                reason: format!("unsupported payload version {}", payload.version),
                recovery_hint: RecoveryHint::ClearAndRetry,
            });
        }

        serde_json::from_str(&payload.body).map_err(|e| CacheError::from(e).for_key(key))
    }

    fn payload_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.{PAYLOAD_EXTENSION}"))
    }

    fn remove_payload(&self, name: &str) {
        let path = self.payload_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not remove cache payload"
                );
            }
        }
    }

    fn remove_orphaned_payloads(&self) {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    cache_dir = %self.cache_dir.display(),
                    error = %e,
                    "Could not scan cache directory"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(PAYLOAD_EXTENSION) {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Could not remove cache payload"
                    );
                }
            }
        }
    }

    fn persist_metadata(&self) {
        if let Err(e) = self.metadata.save() {
            tracing::warn!(
                path = %self.metadata.path().display(),
                error = %e,
                "Could not save cache metadata"
            );
        }
    }
}

fn encode_error(key: &str, source: Box<dyn std::error::Error + Send + Sync>) -> CacheError {
    CacheError::Serialization {
        key: key.to_string(),
        operation: SerializationOp::Encode,
        source,
        recovery_hint: RecoveryHint::Manual {
            instructions: "Check that the value is serializable".to_string(),
        },
    }
}

/// Filesystem-safe name for a logical key
pub fn storage_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write through a uniquely named temp file and rename into place, so a
/// reader never sees a half-written file
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));

    if let Err(e) = std::fs::write(&temp_path, bytes) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(CacheError::Io {
            path: temp_path.clone(),
            operation: "write cache file",
            source: e,
            recovery_hint: RecoveryHint::CheckPermissions { path: temp_path },
        });
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(CacheError::Io {
            path: path.to_path_buf(),
            operation: "rename cache file",
            source: e,
            recovery_hint: RecoveryHint::Retry {
                after: Duration::from_millis(10),
            },
        });
    }

    Ok(())
}
