//! The metadata table persisted next to the payload files
//!
//! One JSON object maps each payload's storage name to its record. Records
//! are decoded one by one, so a single damaged record only loses that
//! entry.

use super::write_atomic;
use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Bookkeeping for one persisted entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// The caller's logical key, before hashing
    pub original_key: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "last_accessed")]
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Free-form caller tags
    #[serde(rename = "metadata", default)]
    pub tags: Map<String, Value>,
}

impl EntryMetadata {
    pub fn new(original_key: &str, size_bytes: u64, tags: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            original_key: original_key.to_string(),
            created_at: now,
            last_accessed_at: now,
            size_bytes,
            tags,
        }
    }

    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }
}

/// In-memory view of `cache_metadata.json`
#[derive(Debug)]
pub struct MetadataTable {
    path: PathBuf,
    entries: BTreeMap<String, EntryMetadata>,
}

impl MetadataTable {
    /// Load the table, starting empty if the file is missing or unreadable
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read(path) {
            Ok(bytes) => decode_entries(path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read cache metadata");
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.entries).map_err(|e| CacheError::Serialization {
            key: self.path.display().to_string(),
            operation: SerializationOp::Encode,
            source: Box::new(e),
            recovery_hint: RecoveryHint::Ignore,
        })?;
        write_atomic(&self.path, &bytes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists_on_disk(&self) -> bool {
        self.path.exists()
    }

    pub fn get(&self, name: &str) -> Option<&EntryMetadata> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EntryMetadata> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, name: String, record: EntryMetadata) {
        self.entries.insert(name, record);
    }

    pub fn remove(&mut self, name: &str) -> Option<EntryMetadata> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryMetadata)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn decode_entries(path: &Path, bytes: &[u8]) -> BTreeMap<String, EntryMetadata> {
    let raw: BTreeMap<String, Value> = match serde_json::from_slice(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Cache metadata is corrupt, starting empty"
            );
            return BTreeMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(name, record)| match serde_json::from_value(record) {
            Ok(record) => Some((name, record)),
            Err(e) => {
                tracing::warn!(
                    entry = %name,
                    error = %e,
                    "Dropping unreadable cache metadata record"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache_metadata.json");

        let mut table = MetadataTable::load(&path);
        assert!(table.is_empty());
        assert!(!table.exists_on_disk());

        let mut tags = Map::new();
        tags.insert("query_length".to_string(), Value::from(17));
        table.insert("abc".to_string(), EntryMetadata::new("key", 42, tags));
        table.save().unwrap();

        let reloaded = MetadataTable::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("abc"), table.get("abc"));
    }

    #[test]
    fn test_on_disk_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache_metadata.json");

        let mut table = MetadataTable::load(&path);
        table.insert("abc".to_string(), EntryMetadata::new("key", 1, Map::new()));
        table.save().unwrap();

        let json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let record = &json["abc"];
        for field in ["original_key", "timestamp", "last_accessed", "size_bytes", "metadata"] {
            assert!(record.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache_metadata.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        assert!(MetadataTable::load(&path).is_empty());
    }

    #[test]
    fn test_bad_record_only_drops_itself() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache_metadata.json");

        let mut table = MetadataTable::load(&path);
        table.insert("good".to_string(), EntryMetadata::new("g", 1, Map::new()));
        table.save().unwrap();

        let mut json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        json["bad"] = serde_json::json!({ "original_key": "b", "timestamp": "yesterday" });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let reloaded = MetadataTable::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("good").is_some());
        assert!(reloaded.get("bad").is_none());
    }

    #[test]
    fn test_expiry_check() {
        let mut record = EntryMetadata::new("k", 1, Map::new());
        let ttl = chrono::Duration::hours(1);
        let now = Utc::now();
        assert!(!record.is_expired(ttl, now));

        record.created_at = now - chrono::Duration::hours(2);
        assert!(record.is_expired(ttl, now));
    }
}
