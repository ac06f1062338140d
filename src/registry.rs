//! Table Registry Module
//!
//! A process-wide registry handing out named cache tables. Constructed once
//! by the embedding application and passed by reference to all consumers;
//! there is no implicit global instance.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::table::CacheTable;

// == Cache Registry ==
/// Creates and returns named [`CacheTable`] instances.
///
/// Asking for the same name twice returns the same table, also under
/// concurrent first access. Tables live as long as the registry holds them.
pub struct CacheRegistry<K, V> {
    tables: RwLock<HashMap<String, Arc<CacheTable<K, V>>>>,
}

impl<K, V> CacheRegistry<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    // == Get Or Create ==
    /// Returns the table registered under `name`, creating it first if
    /// needed.
    pub async fn get_or_create(&self, name: &str) -> Arc<CacheTable<K, V>> {
        if let Some(table) = self.tables.read().await.get(name) {
            return Arc::clone(table);
        }

        let mut tables = self.tables.write().await;
        // Another task may have created the table between the two locks.
        if let Some(table) = tables.get(name) {
            return Arc::clone(table);
        }

        debug!("creating cache table {name}");
        let table = CacheTable::new(name);
        tables.insert(name.to_string(), Arc::clone(&table));
        table
    }

    // == Table ==
    /// Returns the table registered under `name`, if any, without creating
    /// one.
    pub async fn table(&self, name: &str) -> Option<Arc<CacheTable<K, V>>> {
        self.tables.read().await.get(name).cloned()
    }

    // == Count ==
    /// Returns how many tables are currently registered.
    pub async fn count(&self) -> usize {
        self.tables.read().await.len()
    }
}

impl<K, V> Default for CacheRegistry<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_returns_same_table() {
        let registry: CacheRegistry<String, String> = CacheRegistry::new();

        let first = registry.get_or_create("users").await;
        let second = registry.get_or_create("users").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_names_get_distinct_tables() {
        let registry: CacheRegistry<String, String> = CacheRegistry::new();

        let users = registry.get_or_create("users").await;
        let sessions = registry.get_or_create("sessions").await;

        assert!(!Arc::ptr_eq(&users, &sessions));
        assert_eq!(users.name(), "users");
        assert_eq!(sessions.name(), "sessions");
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_table_does_not_create() {
        let registry: CacheRegistry<String, String> = CacheRegistry::new();

        assert!(registry.table("users").await.is_none());
        registry.get_or_create("users").await;
        assert!(registry.table("users").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_first_access() {
        let registry: Arc<CacheRegistry<String, String>> = Arc::new(CacheRegistry::new());

        let a = Arc::clone(&registry);
        let b = Arc::clone(&registry);
        let (first, second) = tokio::join!(
            async move { a.get_or_create("shared").await },
            async move { b.get_or_create("shared").await },
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count().await, 1);
    }
}
