//! Recovery utilities for cache errors

use super::types::{CacheError, RecoveryHint};

impl CacheError {
    /// Get the recovery hint for this error
    #[must_use]
    pub const fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            Self::Io { recovery_hint, .. }
            | Self::Serialization { recovery_hint, .. }
            | Self::Corruption { recovery_hint, .. }
            | Self::Configuration { recovery_hint, .. } => recovery_hint,
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.recovery_hint(), RecoveryHint::Retry { .. })
    }

    /// Check if this error indicates damaged cache contents
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. } | Self::Serialization { .. })
    }
}
