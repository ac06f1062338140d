//! Cache Table Module
//!
//! A named, concurrency-safe collection of cache entries with table-level
//! lifecycle callbacks, an optional data loader for cache misses, and a
//! self-adjusting expiration scheduler.
//!
//! The scheduler never polls on a fixed interval: each expiration scan
//! computes the smallest remaining lifespan across all finite-lifespan
//! entries and arms a one-shot timer for exactly that duration. Adding an
//! entry whose lifespan undercuts the armed interval triggers a fresh scan
//! immediately.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};

/// Callback invoked with an entry handle after it was added to, or right
/// before it is removed from, a table.
pub type EntryCallback<K, V> = Arc<dyn Fn(&Arc<CacheEntry<K, V>>) + Send + Sync>;

/// Data loader invoked on a cache miss to synthesize a value on demand.
pub type DataLoader<K, V> = Arc<dyn Fn(&K) -> Option<LoadedEntry<V>> + Send + Sync>;

/// Sink receiving the table's diagnostic lines. Absent by default (silent).
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Value produced by a [`DataLoader`] on a cache miss. The table adds it
/// under the missing key with the given lifespan.
pub struct LoadedEntry<V> {
    /// Idle lifespan for the loaded entry; zero = never expires
    pub lifespan: Duration,
    /// The loaded value
    pub value: V,
}

// == Cache Table ==
/// A named table of cache entries.
///
/// The table exclusively owns its entry storage and hands out
/// `Arc<CacheEntry>` handles. All operations are safe to call concurrently;
/// user callbacks are always invoked outside the table lock so they may
/// re-enter the table.
///
/// Tables are held as `Arc<CacheTable>` because the expiration scheduler
/// needs to reach the table from its own background task.
pub struct CacheTable<K, V> {
    /// The table's name (uniqueness is the registry's business)
    name: String,
    inner: RwLock<TableInner<K, V>>,
}

struct TableInner<K, V> {
    /// All cached entries
    entries: HashMap<K, Arc<CacheEntry<K, V>>>,
    /// Duration until the next expiration scan; zero = no scan armed
    scan_interval: Duration,
    /// The armed one-shot scan timer, at most one per table
    scan_timer: Option<ScanTimer>,
    /// Identifier handed to the next armed timer
    next_timer_id: u64,
    /// Callback fired on a miss to load a value on demand
    loader: Option<DataLoader<K, V>>,
    /// Callback fired every time an entry was added
    on_added: Option<EntryCallback<K, V>>,
    /// Callback fired right before an entry is removed
    on_about_to_delete: Option<EntryCallback<K, V>>,
    /// Optional sink for the table's diagnostic lines
    log_sink: Option<LogSink>,
}

/// An armed scan timer. The id lets a scan that was started by the timer
/// itself recognize its own handle, so it detaches it instead of aborting
/// its own running task.
struct ScanTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl<K, V> TableInner<K, V> {
    fn log(&self, line: &str) {
        debug!("{line}");
        if let Some(sink) = &self.log_sink {
            sink(line);
        }
    }
}

impl<K, V> CacheTable<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a new, empty cache table. Usually called through
    /// [`CacheRegistry::get_or_create`](crate::CacheRegistry::get_or_create).
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: RwLock::new(TableInner {
                entries: HashMap::new(),
                scan_interval: Duration::ZERO,
                scan_timer: None,
                next_timer_id: 0,
                loader: None,
                on_added: None,
                on_about_to_delete: None,
                log_sink: None,
            }),
        })
    }

    /// Returns the table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // == Count ==
    /// Returns how many entries are currently stored in the table.
    pub async fn count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    // == Exists ==
    /// Tests whether an entry exists. Unlike [`value`](Self::value), this
    /// neither invokes the data loader nor keeps the entry alive.
    pub async fn exists(&self, key: &K) -> bool {
        self.inner.read().await.entries.contains_key(key)
    }

    // == For Each ==
    /// Visits every current entry under the table's shared lock.
    ///
    /// `visit` must not call mutating table operations; the table lock is
    /// held for the duration of the iteration.
    pub async fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &Arc<CacheEntry<K, V>>),
    {
        let inner = self.inner.read().await;
        for (key, entry) in &inner.entries {
            visit(key, entry);
        }
    }

    // == Hook Setters ==
    /// Configures the data loader invoked when [`value`](Self::value) misses.
    /// Affects subsequent lookups only.
    pub async fn set_loader(&self, f: impl Fn(&K) -> Option<LoadedEntry<V>> + Send + Sync + 'static) {
        self.inner.write().await.loader = Some(Arc::new(f));
    }

    /// Configures a callback fired every time an entry was added.
    pub async fn set_on_added(&self, f: impl Fn(&Arc<CacheEntry<K, V>>) + Send + Sync + 'static) {
        self.inner.write().await.on_added = Some(Arc::new(f));
    }

    /// Configures a callback fired right before an entry is removed, whether
    /// the removal is an explicit delete or a scheduler expiration.
    pub async fn set_on_about_to_delete(
        &self,
        f: impl Fn(&Arc<CacheEntry<K, V>>) + Send + Sync + 'static,
    ) {
        self.inner.write().await.on_about_to_delete = Some(Arc::new(f));
    }

    /// Configures the sink receiving the table's diagnostic lines.
    pub async fn set_log_sink(&self, sink: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.write().await.log_sink = Some(Arc::new(sink));
    }

    // == Add ==
    /// Adds a key/value pair to the table, overwriting any existing entry at
    /// that key. An entry left idle for longer than `lifespan` is removed by
    /// the scheduler; a zero `lifespan` means it never expires.
    ///
    /// Fires `on_added` outside the table lock, then runs an expiration scan
    /// if this entry's lifespan undercuts the currently armed interval.
    pub async fn add(self: &Arc<Self>, key: K, lifespan: Duration, value: V) -> Arc<CacheEntry<K, V>> {
        let entry = Arc::new(CacheEntry::new(key.clone(), lifespan, value));

        let (scheduled, on_added) = {
            let mut inner = self.inner.write().await;
            inner.log(&format!(
                "adding entry with key {:?} and lifespan {:?} to table {}",
                key, lifespan, self.name
            ));
            inner.entries.insert(key, Arc::clone(&entry));
            (inner.scan_interval, inner.on_added.clone())
        };

        self.complete_add(&entry, scheduled, on_added).await;
        entry
    }

    // == Not Found Add ==
    /// Adds a key/value pair only if the key is not already present.
    ///
    /// The existence check and the insert happen in a single critical
    /// section. Returns `false` without any side effect when the key exists;
    /// otherwise behaves exactly like [`add`](Self::add) and returns `true`.
    pub async fn not_found_add(self: &Arc<Self>, key: K, lifespan: Duration, value: V) -> bool {
        let entry;
        let (scheduled, on_added) = {
            let mut inner = self.inner.write().await;
            if inner.entries.contains_key(&key) {
                return false;
            }

            entry = Arc::new(CacheEntry::new(key.clone(), lifespan, value));
            inner.log(&format!(
                "adding entry with key {:?} and lifespan {:?} to table {}",
                key, lifespan, self.name
            ));
            inner.entries.insert(key, Arc::clone(&entry));
            (inner.scan_interval, inner.on_added.clone())
        };

        self.complete_add(&entry, scheduled, on_added).await;
        true
    }

    /// Shared tail of the add paths: fires `on_added` outside the lock, then
    /// applies the scan-trigger rule.
    async fn complete_add(
        self: &Arc<Self>,
        entry: &Arc<CacheEntry<K, V>>,
        scheduled: Duration,
        on_added: Option<EntryCallback<K, V>>,
    ) {
        if let Some(on_added) = on_added {
            on_added(entry);
        }

        // Scan now if no timer is armed or this entry expires sooner than
        // the armed interval would have us wake up.
        let lifespan = entry.lifespan();
        if !lifespan.is_zero() && (scheduled.is_zero() || lifespan < scheduled) {
            self.expiration_check(None).await;
        }
    }

    // == Value ==
    /// Fetches an entry and keeps it alive.
    ///
    /// On a hit, the entry's access clock is reset and its access counter
    /// incremented. On a miss with a configured loader, the loader runs
    /// outside the table lock; a loaded value is added through the normal
    /// add path (including `on_added` and the scan-trigger rule). Fails with
    /// [`CacheError::KeyNotFound`] on a plain miss and
    /// [`CacheError::KeyNotFoundOrLoadable`] when the loader yields nothing.
    pub async fn value(self: &Arc<Self>, key: &K) -> Result<Arc<CacheEntry<K, V>>> {
        let (found, loader) = {
            let inner = self.inner.read().await;
            (inner.entries.get(key).cloned(), inner.loader.clone())
        };

        if let Some(entry) = found {
            entry.keep_alive().await;
            return Ok(entry);
        }

        // Miss: try to fetch the value through the data loader.
        if let Some(loader) = loader {
            if let Some(loaded) = loader(key) {
                return Ok(self.add(key.clone(), loaded.lifespan, loaded.value).await);
            }
            return Err(CacheError::KeyNotFoundOrLoadable);
        }

        Err(CacheError::KeyNotFound)
    }

    // == Delete ==
    /// Removes an entry from the table, returning its handle.
    ///
    /// Effect order when the key exists: the table-level
    /// `on_about_to_delete` callback fires outside any lock, then the
    /// entry's own expiry callback fires under the entry's shared lock, then
    /// the key is removed under the exclusive table lock. The scheduler uses
    /// this same path for expired entries.
    pub async fn delete(&self, key: &K) -> Result<Arc<CacheEntry<K, V>>> {
        let (entry, on_about_to_delete) = {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                Some(entry) => (Arc::clone(entry), inner.on_about_to_delete.clone()),
                None => return Err(CacheError::KeyNotFound),
            }
        };

        if let Some(on_about_to_delete) = on_about_to_delete {
            on_about_to_delete(&entry);
        }
        entry.run_expiry_callback().await;

        let hits = entry.access_count().await;
        let mut inner = self.inner.write().await;
        inner.log(&format!(
            "deleting entry with key {:?}, hit {} times, from table {}",
            key, hits, self.name
        ));
        inner.entries.remove(key);

        Ok(entry)
    }

    // == Flush ==
    /// Discards all entries and disarms the scheduler.
    ///
    /// This is a bulk reset, not a sequence of deletions: no per-entry or
    /// table-level removal callbacks are invoked.
    pub async fn flush(&self) {
        let mut inner = self.inner.write().await;
        inner.log(&format!("flushing table {}", self.name));

        inner.entries.clear();
        inner.scan_interval = Duration::ZERO;
        if let Some(timer) = inner.scan_timer.take() {
            timer.handle.abort();
        }
    }

    // == Most Accessed ==
    /// Returns up to `count` entries ordered by descending access count.
    ///
    /// The ranking is computed from a snapshot and re-resolved against the
    /// live table, so entries deleted mid-ranking are skipped and fewer than
    /// `count` handles may come back. The order of entries with equal access
    /// counts is unspecified.
    pub async fn most_accessed(&self, count: usize) -> Vec<Arc<CacheEntry<K, V>>> {
        let mut ranking: Vec<(K, u64)> = {
            let inner = self.inner.read().await;
            let mut pairs = Vec::with_capacity(inner.entries.len());
            for (key, entry) in &inner.entries {
                pairs.push((key.clone(), entry.access_count().await));
            }
            pairs
        };

        ranking.sort_by(|a, b| b.1.cmp(&a.1));

        let inner = self.inner.read().await;
        ranking
            .into_iter()
            .take(count)
            .filter_map(|(key, _)| inner.entries.get(&key).cloned())
            .collect()
    }

    // == Expiration Scan ==
    /// One run of the self-adjusting expiration scan.
    ///
    /// Disarms any pending timer, snapshots the entry handles, and releases
    /// the table lock before scanning, so concurrent adds, deletes and
    /// keep-alives are tolerated; the next cycle always recomputes from live
    /// state. Expired entries go through [`delete`](Self::delete) with full
    /// callback sequencing. Finally re-arms a one-shot timer for the
    /// smallest remaining lifespan, or stays idle when only immortal entries
    /// remain.
    ///
    /// `fired_timer` carries the id of the timer whose firing started this
    /// scan, if any, so the scan can tell its own handle from a stale one.
    async fn expiration_check(self: &Arc<Self>, fired_timer: Option<u64>) {
        let snapshot: Vec<(K, Arc<CacheEntry<K, V>>)> = {
            let mut inner = self.inner.write().await;
            if let Some(timer) = inner.scan_timer.take() {
                // Aborting our own running task would cancel this scan at
                // its next await; just detach the handle in that case.
                if fired_timer != Some(timer.id) {
                    timer.handle.abort();
                }
            }

            if inner.scan_interval.is_zero() {
                inner.log(&format!("expiration scan installed for table {}", self.name));
            } else {
                inner.log(&format!(
                    "expiration scan triggered after {:?} for table {}",
                    inner.scan_interval, self.name
                ));
            }

            inner
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
                .collect()
        };

        let now = Instant::now();
        let mut smallest = Duration::ZERO;
        for (key, entry) in snapshot {
            let lifespan = entry.lifespan();
            if lifespan.is_zero() {
                // Immortal entry, never considered for expiration.
                continue;
            }

            let idle = now.saturating_duration_since(entry.accessed_on().await);
            if idle >= lifespan {
                // A concurrent delete may already have removed the key.
                let _ = self.delete(&key).await;
            } else {
                let remaining = lifespan - idle;
                if smallest.is_zero() || remaining < smallest {
                    smallest = remaining;
                }
            }
        }

        let mut inner = self.inner.write().await;
        if let Some(timer) = inner.scan_timer.take() {
            // A racing scan armed this timer after our snapshot, so it knows
            // about entries we never saw. Keep it when it wakes no later
            // than ours would; otherwise replace it. Either way exactly one
            // timer stays armed.
            if smallest.is_zero() || inner.scan_interval <= smallest {
                inner.scan_timer = Some(timer);
                return;
            }
            timer.handle.abort();
        }

        inner.scan_interval = smallest;
        if !smallest.is_zero() {
            inner.next_timer_id += 1;
            let id = inner.next_timer_id;
            inner.scan_timer = Some(ScanTimer {
                id,
                handle: Self::scan_after(Arc::downgrade(self), id, smallest),
            });
        }
    }

    /// Arms a one-shot timer that re-runs the expiration scan after `delay`
    /// on its own task. Holds only a weak table reference, so a pending
    /// timer never keeps a dropped table alive.
    fn scan_after(table: Weak<Self>, id: u64, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(table) = table.upgrade() {
                table.rescan(id).await;
            }
        })
    }

    /// Boxed indirection for the timer task; a timer firing must not embed
    /// the scan future's type in its own, or the future type would recurse.
    fn rescan(self: Arc<Self>, timer_id: u64) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.expiration_check(Some(timer_id)).await })
    }
}
