//! Bounded execution-manager cache.
//!
//! Maps a resolved cache-key string to an [`ExecutionManager`], bounding
//! how many managers the process holds via least-recently-used eviction.
//! Entries are type-erased so a single cache instance (owned by the
//! client and threaded through the routing layer) can bound managers
//! across differently-typed queries.
//!
//! A manager is created lazily on first access for a key and destroyed
//! only by eviction; there is no manual disposal.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::DEFAULT_CACHE_CAPACITY;
use crate::manager::ExecutionManager;

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an existing manager.
    pub hits: u64,
    /// Lookups that created a new manager.
    pub misses: u64,
    /// Managers dropped by LRU eviction.
    pub evictions: u64,
}

struct CacheState {
    /// Key -> type-erased `Arc<ExecutionManager<R, P>>`.
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
    /// Keys ordered by recency, most-recently-used at the back.
    recency: VecDeque<String>,
}

/// Bounded key-to-manager cache with LRU eviction.
pub struct ManagerCache {
    state: Mutex<CacheState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ManagerCache {
    /// Creates a cache holding at most `capacity` managers.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the manager for `key`, creating it with `make` if absent.
    ///
    /// Marks `key` most-recently-used and evicts the least-recently-used
    /// key if the capacity would be exceeded. The manager created for a
    /// key is fixed: later lookups for the same key return it regardless
    /// of the `make` they pass. Never fails.
    ///
    /// A key reused by a query of a different result or payload type
    /// cannot share the stored manager; the entry is replaced and a
    /// warning logged.
    pub fn get_or_create<R, P>(
        &self,
        key: &str,
        make: impl FnOnce() -> ExecutionManager<R, P>,
    ) -> Arc<ExecutionManager<R, P>>
    where
        R: Clone + Send + Sync + 'static,
        P: Send + 'static,
    {
        let mut state = self.state.lock().expect("manager cache poisoned");

        let manager = match state.entries.get(key) {
            Some(entry) => match entry.clone().downcast::<ExecutionManager<R, P>>() {
                Ok(existing) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    existing
                }
                Err(_) => {
                    tracing::warn!(key, "cache entry type mismatch, replacing manager");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let manager = Arc::new(make());
                    state.entries.insert(
                        key.to_string(),
                        manager.clone() as Arc<dyn Any + Send + Sync>,
                    );
                    manager
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let manager = Arc::new(make());
                state.entries.insert(
                    key.to_string(),
                    manager.clone() as Arc<dyn Any + Send + Sync>,
                );
                manager
            }
        };

        if let Some(position) = state.recency.iter().position(|k| k == key) {
            state.recency.remove(position);
        }
        state.recency.push_back(key.to_string());

        if state.recency.len() > self.capacity {
            if let Some(evicted) = state.recency.pop_front() {
                state.entries.remove(&evicted);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %evicted, "evicted least recently used manager");
            }
        }

        manager
    }

    /// Number of managers currently held.
    pub fn len(&self) -> usize {
        self.state.lock().expect("manager cache poisoned").entries.len()
    }

    /// Returns true when no managers are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a manager exists for `key`. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.state
            .lock()
            .expect("manager cache poisoned")
            .entries
            .contains_key(key)
    }

    /// The maximum number of managers this cache will hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ManagerCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for ManagerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
