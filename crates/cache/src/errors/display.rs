//! Display implementations for cache errors

use super::types::{CacheError, RecoveryHint};
use std::fmt;

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                path,
                operation,
                source,
                ..
            } => write!(
                f,
                "I/O error during {} on '{}': {}",
                operation,
                path.display(),
                source
            ),
            Self::Serialization {
                key,
                operation,
                source,
                ..
            } => write!(f, "Failed to {operation:?} cache entry '{key}': {source}"),
            Self::Corruption { key, reason, .. } => {
                write!(f, "Cache corruption detected for key '{key}': {reason}")
            }
            Self::Configuration { message, .. } => {
                write!(f, "Cache configuration error: {message}")
            }
        }
    }
}

impl fmt::Display for RecoveryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry { after } => write!(f, "retry after {after:?}"),
            Self::ClearAndRetry => write!(f, "clear the cache and retry"),
            Self::CheckPermissions { path } => {
                write!(f, "check permissions on '{}'", path.display())
            }
            Self::Manual { instructions } => write!(f, "{instructions}"),
            Self::Ignore => write!(f, "safe to ignore"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
