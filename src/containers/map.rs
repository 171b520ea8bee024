//! Ordered map and multimap
//!
//! Facades over the shared order tree. Both expose `reserve`, which
//! guarantees free node slots with at most one heap slab obtained per
//! call. Neither offers `swap`: a node-level swap would entangle two
//! allocators, so the operation simply does not exist here.

use crate::containers::tree::{OrderTree, TreeIter};
use crate::error::Result;
use crate::mempool::Pool;
use std::fmt;
use std::sync::Arc;

/// Ordered map with unique keys and slab-backed nodes
///
/// The first `STACK` entries are stored inside the map object itself;
/// later entries come from heap slabs obtained in batches from the pool.
pub struct SlabMap<K, V, const STACK: usize> {
    tree: OrderTree<K, V, STACK>,
}

impl<K: Ord, V, const STACK: usize> SlabMap<K, V, STACK> {
    /// Create a map with the default heap batch size
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            tree: OrderTree::new(pool),
        }
    }

    /// Create a map whose heap slabs hold `heap_batch` nodes each
    pub fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        Self {
            tree: OrderTree::with_heap_batch(pool, heap_batch),
        }
    }

    /// Pool this map reports to
    pub fn pool(&self) -> &Arc<Pool> {
        self.tree.pool()
    }

    /// Ensure at least `count` free node slots; at most one heap slab is
    /// obtained regardless of how many slots are missing
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        self.tree.reserve(count)
    }

    /// Insert a key-value pair, returning the displaced value if the key
    /// was already present
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.tree.insert_unique(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tree.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.contains(key)
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.tree.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear()
    }

    /// Iterate entries in ascending key order
    pub fn iter(&self) -> TreeIter<'_, K, V, STACK> {
        self.tree.iter()
    }
}

impl<K: Ord + Clone, V: Clone, const STACK: usize> SlabMap<K, V, STACK> {
    /// Copy every entry into a fresh map on the same pool
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::new(self.pool().clone());
        for (key, value) in self.iter() {
            clone.insert(key.clone(), value.clone())?;
        }
        Ok(clone)
    }
}

impl<K: Ord + Clone, V: Clone, const STACK: usize> Clone for SlabMap<K, V, STACK> {
    fn clone(&self) -> Self {
        self.try_clone().expect("pool limit exceeded while cloning map")
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug, const STACK: usize> fmt::Debug for SlabMap<K, V, STACK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Ordered map allowing duplicate keys
///
/// Equal keys iterate in insertion order. `remove_all` has the
/// erase-by-key semantics of a classic multimap; `remove_one` drops a
/// single entry for the key.
pub struct SlabMultimap<K, V, const STACK: usize> {
    tree: OrderTree<K, V, STACK>,
}

impl<K: Ord, V, const STACK: usize> SlabMultimap<K, V, STACK> {
    /// Create a multimap with the default heap batch size
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            tree: OrderTree::new(pool),
        }
    }

    /// Create a multimap whose heap slabs hold `heap_batch` nodes each
    pub fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        Self {
            tree: OrderTree::with_heap_batch(pool, heap_batch),
        }
    }

    /// Pool this multimap reports to
    pub fn pool(&self) -> &Arc<Pool> {
        self.tree.pool()
    }

    /// Ensure at least `count` free node slots with one heap slab at most
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        self.tree.reserve(count)
    }

    /// Insert a key-value pair; duplicates always succeed
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        self.tree.insert_multi(key, value)
    }

    /// Some value stored under this key, if any
    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.contains(key)
    }

    /// Number of entries stored under this key
    pub fn count(&self, key: &K) -> usize {
        self.tree.count(key)
    }

    /// Remove one entry for this key
    pub fn remove_one(&mut self, key: &K) -> Option<V> {
        self.tree.remove(key).map(|(_, value)| value)
    }

    /// Remove every entry for this key; returns how many went
    pub fn remove_all(&mut self, key: &K) -> usize {
        self.tree.remove_all(key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear()
    }

    /// Iterate entries in ascending key order, duplicates in insertion
    /// order
    pub fn iter(&self) -> TreeIter<'_, K, V, STACK> {
        self.tree.iter()
    }
}

impl<K: Ord + Clone, V: Clone, const STACK: usize> SlabMultimap<K, V, STACK> {
    /// Copy every entry into a fresh multimap on the same pool
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::new(self.pool().clone());
        for (key, value) in self.iter() {
            clone.insert(key.clone(), value.clone())?;
        }
        Ok(clone)
    }
}

impl<K: Ord + Clone, V: Clone, const STACK: usize> Clone for SlabMultimap<K, V, STACK> {
    fn clone(&self) -> Self {
        self.try_clone()
            .expect("pool limit exceeded while cloning multimap")
    }
}

impl<K: Ord + fmt::Debug, V: fmt::Debug, const STACK: usize> fmt::Debug
    for SlabMultimap<K, V, STACK>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
