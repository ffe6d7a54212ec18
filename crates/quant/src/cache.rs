//! Index-keyed cache for incremental indicator evaluation.
//!
//! Each list in an indicator chain keeps its values in an [`IndexedCache`].
//! Once an index is older than the largest lookback of the chain, the caller
//! evicts it, so memory stays bounded on arbitrarily long sources.
//!
//! # Example
//! ```
//! use quant::cache::IndexedCache;
//!
//! let mut cache = IndexedCache::new();
//! for i in 0..10 {
//!     cache.insert(i, i as f64);
//! }
//! cache.evict_through(6);
//! assert_eq!(cache.first_index(), Some(7));
//! assert_eq!(cache.get(9), Some(&9.0));
//! ```

use std::collections::BTreeMap;
use types::Index;

/// Values keyed by source index.
#[derive(Debug, Clone)]
pub struct IndexedCache<T> {
    entries: BTreeMap<Index, T>,
}

impl<T> Default for IndexedCache<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> IndexedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value at the same index.
    pub fn insert(&mut self, index: Index, value: T) {
        self.entries.insert(index, value);
    }

    #[inline]
    pub fn get(&self, index: Index) -> Option<&T> {
        self.entries.get(&index)
    }

    #[inline]
    pub fn contains(&self, index: Index) -> bool {
        self.entries.contains_key(&index)
    }

    /// Remove a single entry.
    pub fn remove(&mut self, index: Index) -> Option<T> {
        self.entries.remove(&index)
    }

    /// Remove every entry with an index `<= index`. Returns how many were removed.
    pub fn evict_through(&mut self, index: Index) -> usize {
        let before = self.entries.len();
        self.entries = self.entries.split_off(&(index + 1));
        before - self.entries.len()
    }

    /// Oldest cached index.
    pub fn first_index(&self) -> Option<Index> {
        self.entries.keys().next().copied()
    }

    /// Newest cached index.
    pub fn last_index(&self) -> Option<Index> {
        self.entries.keys().next_back().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over `(index, value)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> + '_ {
        self.entries.iter().map(|(i, v)| (*i, v))
    }
}

impl<T: Copy> IndexedCache<T> {
    /// Copy of the value at `index`.
    #[inline]
    pub fn value(&self, index: Index) -> Option<T> {
        self.entries.get(&index).copied()
    }
}
