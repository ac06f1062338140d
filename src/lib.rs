//! Idlecache - embeddable in-process cache tables with idle-time expiration
//!
//! Provides named, concurrency-safe key/value cache tables whose entries are
//! removed automatically once left idle beyond a per-entry lifespan, with
//! lifecycle callback hooks and an on-miss data loader.
//!
//! Expiration is driven by a self-adjusting scheduler: instead of polling on
//! a fixed interval, each scan arms a one-shot timer for exactly the smallest
//! remaining lifespan in the table.

pub mod entry;
pub mod error;
pub mod registry;
pub mod table;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{CacheEntry, ExpiryCallback};
pub use error::{CacheError, Result};
pub use registry::CacheRegistry;
pub use table::{CacheTable, DataLoader, EntryCallback, LoadedEntry, LogSink};
