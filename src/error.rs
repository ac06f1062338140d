//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type surfaced by cache table operations.
///
/// Only the lookup paths can fail; every other table operation is total.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Key not found in the table
    #[error("key not found in cache")]
    KeyNotFound,

    /// Key not found and the configured data loader yielded nothing
    #[error("key not found and could not be loaded into cache")]
    KeyNotFoundOrLoadable,
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
