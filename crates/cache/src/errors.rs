//! Error handling for the two-tier cache
//!
//! Errors carry a recovery hint so that callers (and logs) can tell a
//! retryable I/O hiccup from a corrupt cache directory. Tier operations
//! never hand these to their callers; they are logged and turned into
//! misses. Only construction and configuration loading return them.

mod conversions;
mod display;
mod recovery;
mod types;

pub use types::*;
