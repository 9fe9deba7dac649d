//! Database metadata lookups
//!
//! The engine needs two pieces of catalog information it cannot see on the
//! wire: whether a stored procedure is selectable, and the primary key
//! columns of a relation. Both are behind the [`Catalog`] trait so they can
//! come from system table queries or from tests.
//!
//! Selectability answers are cached per statement handle in an LRU keyed by
//! procedure name, since call statements are typically re-executed many
//! times against the same procedure.

use indexmap::IndexMap;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;

/// Metadata queries the engine delegates to the connection.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether a stored procedure returns rows when selected from.
    ///
    /// `None` means the server predates the selectability flag; callers
    /// treat such procedures as executable.
    async fn procedure_selectable(&self, procedure: &str) -> Result<Option<bool>>;

    /// Primary key column names of a relation, in key order.
    ///
    /// Empty when the relation has no primary key.
    async fn primary_key_columns(&self, relation: &str) -> Result<Vec<String>>;
}

/// LRU cache of procedure selectability answers.
#[derive(Debug)]
pub struct SelectabilityCache {
    entries: IndexMap<String, bool>,
    max_size: usize,
}

impl SelectabilityCache {
    /// Create a cache holding up to `max_size` procedures; zero disables
    /// caching
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size,
        }
    }

    /// Look up a cached answer, promoting the entry to most recently used
    pub fn get(&mut self, procedure: &str) -> Option<bool> {
        if self.max_size == 0 {
            return None;
        }
        let flag = self.entries.shift_remove(procedure)?;
        self.entries.insert(procedure.to_string(), flag);
        tracing::trace!(procedure, selectable = flag, "selectability cache hit");
        Some(flag)
    }

    /// Store an answer, evicting the least recently used entry when full
    pub fn put(&mut self, procedure: String, selectable: bool) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.shift_remove(&procedure).is_none()
            && self.entries.len() >= self.max_size
        {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                tracing::trace!(procedure = %evicted, "evicting selectability cache entry");
            }
        }
        self.entries.insert(procedure, selectable);
    }

    /// Number of cached procedures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// [`Catalog`] wrapper that caches selectability answers.
///
/// Primary key lookups pass through uncached; they happen once per cursor
/// open rather than once per execution.
pub struct CachedCatalog {
    inner: Arc<dyn Catalog>,
    selectability: Mutex<SelectabilityCache>,
}

impl CachedCatalog {
    /// Wrap a catalog with a selectability cache of `max_size` entries
    pub fn new(inner: Arc<dyn Catalog>, max_size: usize) -> Self {
        Self {
            inner,
            selectability: Mutex::new(SelectabilityCache::new(max_size)),
        }
    }
}

#[async_trait]
impl Catalog for CachedCatalog {
    async fn procedure_selectable(&self, procedure: &str) -> Result<Option<bool>> {
        {
            let mut cache = self.selectability.lock().await;
            if let Some(flag) = cache.get(procedure) {
                return Ok(Some(flag));
            }
        }
        let resolved = self.inner.procedure_selectable(procedure).await?;
        // legacy "unknown" answers stay uncached so an upgraded server is
        // picked up on the next ask
        if let Some(flag) = resolved {
            self.selectability.lock().await.put(procedure.to_string(), flag);
        }
        Ok(resolved)
    }

    async fn primary_key_columns(&self, relation: &str) -> Result<Vec<String>> {
        self.inner.primary_key_columns(relation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_basic_operations() {
        let mut cache = SelectabilityCache::new(10);
        assert!(cache.is_empty());
        assert_eq!(cache.get("P1"), None);

        cache.put("P1".to_string(), true);
        cache.put("P2".to_string(), false);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("P1"), Some(true));
        assert_eq!(cache.get("P2"), Some(false));
    }

    #[test]
    fn test_cache_eviction_order() {
        let mut cache = SelectabilityCache::new(2);
        cache.put("A".to_string(), true);
        cache.put("B".to_string(), true);

        // touch A so B becomes least recently used
        cache.get("A");
        cache.put("C".to_string(), false);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("B"), None);
        assert_eq!(cache.get("A"), Some(true));
        assert_eq!(cache.get("C"), Some(false));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let mut cache = SelectabilityCache::new(0);
        for i in 0..100 {
            cache.put(format!("P{i}"), true);
        }
        assert!(cache.is_empty());
        assert_eq!(cache.get("P0"), None);
    }

    #[test]
    fn test_cache_overwrite_does_not_evict() {
        let mut cache = SelectabilityCache::new(2);
        cache.put("A".to_string(), true);
        cache.put("B".to_string(), true);
        cache.put("A".to_string(), false);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("A"), Some(false));
        assert_eq!(cache.get("B"), Some(true));
    }

    struct CountingCatalog {
        asks: AtomicUsize,
        answer: Option<bool>,
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        async fn procedure_selectable(&self, _procedure: &str) -> Result<Option<bool>> {
            self.asks.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }

        async fn primary_key_columns(&self, _relation: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_cached_catalog_asks_once() {
        let inner = Arc::new(CountingCatalog {
            asks: AtomicUsize::new(0),
            answer: Some(true),
        });
        let catalog = CachedCatalog::new(inner.clone(), 8);

        assert_eq!(catalog.procedure_selectable("GET_ROWS").await.unwrap(), Some(true));
        assert_eq!(catalog.procedure_selectable("GET_ROWS").await.unwrap(), Some(true));
        assert_eq!(inner.asks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_catalog_does_not_cache_unknown() {
        let inner = Arc::new(CountingCatalog {
            asks: AtomicUsize::new(0),
            answer: None,
        });
        let catalog = CachedCatalog::new(inner.clone(), 8);

        assert_eq!(catalog.procedure_selectable("OLD_PROC").await.unwrap(), None);
        assert_eq!(catalog.procedure_selectable("OLD_PROC").await.unwrap(), None);
        assert_eq!(inner.asks.load(Ordering::SeqCst), 2);
    }
}
