//! Cache configuration management with precedence and validation
use crate::errors::{Error, RecoveryHint, Result, SerializationOp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at a JSON config file
pub const CONFIG_FILE_ENV: &str = "CATALOG_CACHE_CONFIG";

/// Configuration for the memory and disk tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for memory tier entries, measured from creation
    #[serde(with = "duration_secs")]
    pub memory_ttl: Duration,
    /// Maximum number of entries held by the memory tier
    pub memory_max_entries: usize,
    /// Time-to-live for disk tier entries, in hours
    pub disk_ttl_hours: u64,
    /// Directory holding payload files and the metadata table
    pub cache_dir: PathBuf,
    /// Query results with fewer elements than this stay in memory
    pub memory_result_threshold: usize,
    /// Whether to open the disk tier at all
    pub disk_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl: Duration::from_secs(3600),
            memory_max_entries: 500,
            disk_ttl_hours: 24,
            cache_dir: PathBuf::from("./cache"),
            memory_result_threshold: 100,
            disk_enabled: true,
        }
    }
}

impl CacheConfig {
    /// Reject values that would make a tier useless
    pub fn validate(&self) -> Result<()> {
        if self.memory_max_entries == 0 {
            return Err(invalid("memory_max_entries must be at least 1"));
        }
        if self.memory_ttl.is_zero() {
            return Err(invalid("memory_ttl must be greater than zero"));
        }
        if self.disk_enabled && self.cache_dir.as_os_str().is_empty() {
            return Err(invalid("cache_dir must not be empty"));
        }
        Ok(())
    }

    /// Reset only the fields `validate` rejects, keeping everything else.
    /// An empty cache directory disables the disk tier rather than falling
    /// back to the default location.
    #[must_use]
    pub fn repaired(mut self) -> Self {
        let defaults = Self::default();
        if self.memory_max_entries == 0 {
            self.memory_max_entries = defaults.memory_max_entries;
        }
        if self.memory_ttl.is_zero() {
            self.memory_ttl = defaults.memory_ttl;
        }
        if self.disk_enabled && self.cache_dir.as_os_str().is_empty() {
            self.disk_enabled = false;
        }
        self
    }
}

fn invalid(message: &str) -> Error {
    Error::Configuration {
        message: message.to_string(),
        recovery_hint: RecoveryHint::Manual {
            instructions: "Fix the cache configuration".to_string(),
        },
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default configuration
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
}

/// Builder for creating cache configurations
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier TTL
    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.config.memory_ttl = ttl;
        self
    }

    /// Set the memory tier capacity
    pub fn with_memory_max_entries(mut self, max_entries: usize) -> Self {
        self.config.memory_max_entries = max_entries;
        self
    }

    /// Set the disk tier TTL in hours
    pub fn with_disk_ttl_hours(mut self, hours: u64) -> Self {
        self.config.disk_ttl_hours = hours;
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = cache_dir.into();
        self
    }

    /// Set the element count below which query results stay in memory
    pub fn with_memory_result_threshold(mut self, threshold: usize) -> Self {
        self.config.memory_result_threshold = threshold;
        self
    }

    /// Enable or disable the disk tier
    pub fn with_disk_enabled(mut self, enabled: bool) -> Self {
        self.config.disk_enabled = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

/// Configuration loader that handles precedence: defaults, file, environment
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load configuration with full precedence handling
    pub fn load() -> Result<(CacheConfig, ConfigSource)> {
        let mut config = CacheConfig::default();
        let mut source = ConfigSource::Default;

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                config = Self::load_from_file(&path)?;
                source = ConfigSource::ConfigFile(path);
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "Cache config file not found, using defaults"
                );
            }
        }

        if Self::apply_env(&mut config) {
            source = ConfigSource::EnvironmentVariable("CATALOG_CACHE_*".to_string());
        }

        config.validate()?;
        Ok((config, source))
    }

    /// Load configuration from a JSON file with an optional `cache` section
    pub fn load_from_file(path: &Path) -> Result<CacheConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            operation: "read config file",
            source: e,
            recovery_hint: RecoveryHint::CheckPermissions {
                path: path.to_path_buf(),
            },
        })?;

        let mut document: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| Error::Serialization {
                key: path.display().to_string(),
                operation: SerializationOp::Decode,
                source: Box::new(e),
                recovery_hint: RecoveryHint::Manual {
                    instructions: "Check config file syntax".to_string(),
                },
            })?;

        let section = if document.get("cache").is_some() {
            document["cache"].take()
        } else {
            document
        };

        serde_json::from_value(section).map_err(|e| Error::Serialization {
            key: path.display().to_string(),
            operation: SerializationOp::Decode,
            source: Box::new(e),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Check cache config field types".to_string(),
            },
        })
    }

    /// Apply environment overrides; returns whether any were present
    pub fn apply_env(config: &mut CacheConfig) -> bool {
        let mut has_env_config = false;

        if let Ok(dir) = std::env::var("CATALOG_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
            has_env_config = true;
        }

        if let Some(secs) = parse_env::<u64>("CATALOG_CACHE_MEMORY_TTL_SECS") {
            config.memory_ttl = Duration::from_secs(secs);
            has_env_config = true;
        }

        if let Some(max) = parse_env::<usize>("CATALOG_CACHE_MEMORY_MAX_ENTRIES") {
            config.memory_max_entries = max;
            has_env_config = true;
        }

        if let Some(hours) = parse_env::<u64>("CATALOG_CACHE_DISK_TTL_HOURS") {
            config.disk_ttl_hours = hours;
            has_env_config = true;
        }

        if let Some(enabled) = parse_env::<bool>("CATALOG_CACHE_DISK_ENABLED") {
            config.disk_enabled = enabled;
            has_env_config = true;
        }

        has_env_config
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_lowercase().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable cache setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        CONFIG_FILE_ENV,
        "CATALOG_CACHE_DIR",
        "CATALOG_CACHE_MEMORY_TTL_SECS",
        "CATALOG_CACHE_MEMORY_MAX_ENTRIES",
        "CATALOG_CACHE_DISK_TTL_HOURS",
        "CATALOG_CACHE_DISK_ENABLED",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_ttl, Duration::from_secs(3600));
        assert_eq!(config.memory_max_entries, 500);
        assert_eq!(config.disk_ttl_hours, 24);
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let config = CacheConfigBuilder::new().with_memory_max_entries(0).build();
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_repaired_keeps_valid_fields() {
        let config = CacheConfigBuilder::new()
            .with_cache_dir("/srv/catalog/cache")
            .with_memory_max_entries(0)
            .with_memory_ttl(Duration::ZERO)
            .with_disk_ttl_hours(6)
            .build()
            .repaired();

        assert!(config.validate().is_ok());
        assert_eq!(config.cache_dir, PathBuf::from("/srv/catalog/cache"));
        assert_eq!(config.memory_max_entries, 500);
        assert_eq!(config.memory_ttl, Duration::from_secs(3600));
        assert_eq!(config.disk_ttl_hours, 6);
        assert!(config.disk_enabled);

        let no_dir = CacheConfigBuilder::new().with_cache_dir("").build().repaired();
        assert!(no_dir.validate().is_ok());
        assert!(!no_dir.disk_enabled);
        assert_eq!(no_dir.cache_dir, PathBuf::new());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("CATALOG_CACHE_DIR", "/var/tmp/catalog");
        std::env::set_var("CATALOG_CACHE_MEMORY_MAX_ENTRIES", "42");
        std::env::set_var("CATALOG_CACHE_DISK_TTL_HOURS", "not-a-number");

        let (config, source) = CacheConfigLoader::load().unwrap();
        clear_env();

        assert_eq!(config.cache_dir, PathBuf::from("/var/tmp/catalog"));
        assert_eq!(config.memory_max_entries, 42);
        assert_eq!(config.disk_ttl_hours, 24);
        assert!(matches!(source, ConfigSource::EnvironmentVariable(_)));
    }

    #[test]
    #[serial]
    fn test_file_then_env_precedence() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"cache": {"memory_ttl": 60, "disk_ttl_hours": 2, "cache_dir": "/from/file"}}"#,
        )
        .unwrap();

        std::env::set_var(CONFIG_FILE_ENV, &path);
        std::env::set_var("CATALOG_CACHE_DISK_ENABLED", "FALSE");
        let (config, _) = CacheConfigLoader::load().unwrap();
        clear_env();

        assert_eq!(config.memory_ttl, Duration::from_secs(60));
        assert_eq!(config.disk_ttl_hours, 2);
        assert_eq!(config.cache_dir, PathBuf::from("/from/file"));
        assert_eq!(config.memory_max_entries, 500);
        assert!(!config.disk_enabled);
    }

    #[test]
    #[serial]
    fn test_no_overrides_means_default_source() {
        clear_env();
        let (config, source) = CacheConfigLoader::load().unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(source, ConfigSource::Default);
    }

    #[test]
    fn test_malformed_file_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = CacheConfigLoader::load_from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
