//! Core error types for the cache system

use std::path::PathBuf;
use std::time::Duration;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Re-export CacheError as Error for convenience
pub use CacheError as Error;

/// Error type for cache operations
#[derive(Debug)]
pub enum CacheError {
    /// I/O errors while touching the cache directory
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// Payload or metadata encoding/decoding errors
    Serialization {
        key: String,
        operation: SerializationOp,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },

    /// On-disk state that contradicts the metadata table
    Corruption {
        key: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Invalid or unusable configuration
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHint {
    /// Retry the operation
    Retry { after: Duration },

    /// Clear the cache and retry
    ClearAndRetry,

    /// Check file permissions
    CheckPermissions { path: PathBuf },

    /// No automated recovery possible
    Manual { instructions: String },

    /// Operation can be safely ignored; the value will be recomputed
    Ignore,
}

/// Serialization operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationOp {
    Encode,
    Decode,
}
