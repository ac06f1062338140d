//! Cache Entry Module
//!
//! Defines a single cached key/value pair with idle-expiration metadata and
//! an optional per-entry removal callback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Callback invoked with the entry's key right before the entry is removed
/// from its table.
pub type ExpiryCallback<K> = Arc<dyn Fn(&K) + Send + Sync>;

// == Cache Entry ==
/// A single cache entry.
///
/// The key, value, lifespan and creation timestamp are fixed at creation and
/// readable without locking. Access metadata and the expiry callback are
/// guarded by an entry-local lock, so readers get a consistent snapshot
/// against concurrent keep-alives.
///
/// Entries are created by their table and handed out as `Arc<CacheEntry>`.
/// A handle stays readable after the entry has been removed from the table;
/// its mutable fields simply stop being updated.
pub struct CacheEntry<K, V> {
    /// The entry's cache key
    key: K,
    /// The stored value
    value: V,
    /// Maximum idle duration before the entry may expire; zero = never expires
    lifespan: Duration,
    /// Creation timestamp
    created_on: Instant,
    /// Mutable access metadata, guarded by the entry lock
    state: RwLock<EntryState<K>>,
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("lifespan", &self.lifespan)
            .field("created_on", &self.created_on)
            .finish_non_exhaustive()
    }
}

struct EntryState<K> {
    /// Last keep-alive timestamp
    accessed_on: Instant,
    /// How often the entry has been kept alive; never decreases
    access_count: u64,
    /// Optional callback fired right before this entry is removed
    on_expire: Option<ExpiryCallback<K>>,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry with `accessed_on == created_on` and a zero
    /// access count. Only tables create entries.
    pub(crate) fn new(key: K, lifespan: Duration, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            lifespan,
            created_on: now,
            state: RwLock::new(EntryState {
                accessed_on: now,
                access_count: 0,
                on_expire: None,
            }),
        }
    }

    /// Returns the entry's key.
    pub fn key(&self) -> &K {
        // immutable, no lock needed
        &self.key
    }

    /// Returns the stored value.
    pub fn value(&self) -> &V {
        // immutable, no lock needed
        &self.value
    }

    /// Returns the entry's idle lifespan. Zero means the entry never expires.
    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Returns when the entry was created.
    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    /// Returns when the entry was last kept alive.
    pub async fn accessed_on(&self) -> Instant {
        self.state.read().await.accessed_on
    }

    /// Returns how often the entry has been kept alive.
    pub async fn access_count(&self) -> u64 {
        self.state.read().await.access_count
    }

    // == Keep Alive ==
    /// Marks the entry as accessed: stamps `accessed_on` and increments the
    /// access counter. Resets the entry's expiration clock.
    pub async fn keep_alive(&self) {
        let mut state = self.state.write().await;
        state.accessed_on = Instant::now();
        state.access_count += 1;
    }

    // == Expiry Callback ==
    /// Configures a callback that fires right before the entry is removed
    /// from its table. Replaces any previous callback; takes effect on the
    /// entry's next removal.
    pub async fn set_expiry_callback(&self, f: impl Fn(&K) + Send + Sync + 'static) {
        self.state.write().await.on_expire = Some(Arc::new(f));
    }

    /// Clears the entry's expiry callback.
    pub async fn remove_expiry_callback(&self) {
        self.state.write().await.on_expire = None;
    }

    /// Runs the expiry callback, if one is set, under the entry's shared
    /// lock. Called by the table's delete path.
    pub(crate) async fn run_expiry_callback(&self) {
        let state = self.state.read().await;
        if let Some(on_expire) = &state.on_expire {
            on_expire(&self.key);
        }
    }
}
