//! Error conversion utilities

use super::types::{CacheError, RecoveryHint, SerializationOp};
use std::path::PathBuf;
use std::time::Duration;

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let recovery_hint = match error.kind() {
            ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
                path: PathBuf::from("."),
            },
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                RecoveryHint::Retry {
                    after: Duration::from_millis(100),
                }
            }
            _ => RecoveryHint::Ignore,
        };

        Self::Io {
            path: PathBuf::from("."),
            operation: "unknown",
            source: error,
            recovery_hint,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        let operation = if error.is_data() || error.is_syntax() || error.is_eof() {
            SerializationOp::Decode
        } else {
            SerializationOp::Encode
        };
        Self::Serialization {
            key: String::new(),
            operation,
            source: Box::new(error),
            recovery_hint: RecoveryHint::ClearAndRetry,
        }
    }
}

impl From<bincode::Error> for CacheError {
    fn from(error: bincode::Error) -> Self {
        Self::Serialization {
            key: String::new(),
            operation: SerializationOp::Decode,
            source: error,
            recovery_hint: RecoveryHint::ClearAndRetry,
        }
    }
}

impl CacheError {
    /// Attach the logical key an encoding failure belongs to
    #[must_use]
    pub fn for_key(self, key: &str) -> Self {
        match self {
            Self::Serialization {
                operation,
                source,
                recovery_hint,
                ..
            } => Self::Serialization {
                key: key.to_string(),
                operation,
                source,
                recovery_hint,
            },
            other => other,
        }
    }
}
