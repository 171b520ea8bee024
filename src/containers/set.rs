//! Ordered set and multiset
//!
//! The set facades over the order tree; a set node carries no payload
//! beyond its key. As with the maps, `reserve` is exposed and `swap` is
//! not part of the API.

use crate::containers::tree::{OrderTree, TreeIter};
use crate::error::Result;
use crate::mempool::Pool;
use std::fmt;
use std::sync::Arc;

/// Ordered set with unique values and slab-backed nodes
pub struct SlabSet<K, const STACK: usize> {
    tree: OrderTree<K, (), STACK>,
}

impl<K: Ord, const STACK: usize> SlabSet<K, STACK> {
    /// Create a set with the default heap batch size
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            tree: OrderTree::new(pool),
        }
    }

    /// Create a set whose heap slabs hold `heap_batch` nodes each
    pub fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        Self {
            tree: OrderTree::with_heap_batch(pool, heap_batch),
        }
    }

    /// Pool this set reports to
    pub fn pool(&self) -> &Arc<Pool> {
        self.tree.pool()
    }

    /// Ensure at least `count` free node slots with one heap slab at most
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        self.tree.reserve(count)
    }

    /// Insert a value; returns false if it was already present
    pub fn insert(&mut self, value: K) -> Result<bool> {
        Ok(self.tree.insert_unique(value, ())?.is_none())
    }

    pub fn contains(&self, value: &K) -> bool {
        self.tree.contains(value)
    }

    /// Remove a value; returns whether it was present
    pub fn remove(&mut self, value: &K) -> bool {
        self.tree.remove(value).is_some()
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

    /// Iterate values in ascending order
    pub fn iter(&self) -> SetIter<'_, K, STACK> {
        SetIter {
            inner: self.tree.iter(),
        }
    }
}

impl<K: Ord + Clone, const STACK: usize> SlabSet<K, STACK> {
    /// Copy every value into a fresh set on the same pool
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::new(self.pool().clone());
        for value in self.iter() {
            clone.insert(value.clone())?;
        }
        Ok(clone)
    }
}

impl<K: Ord + Clone, const STACK: usize> Clone for SlabSet<K, STACK> {
    fn clone(&self) -> Self {
        self.try_clone().expect("pool limit exceeded while cloning set")
    }
}

impl<K: Ord + fmt::Debug, const STACK: usize> fmt::Debug for SlabSet<K, STACK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Ordered multiset; duplicate values iterate in insertion order
pub struct SlabMultiset<K, const STACK: usize> {
    tree: OrderTree<K, (), STACK>,
}

impl<K: Ord, const STACK: usize> SlabMultiset<K, STACK> {
    /// Create a multiset with the default heap batch size
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            tree: OrderTree::new(pool),
        }
    }

    /// Create a multiset whose heap slabs hold `heap_batch` nodes each
    pub fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        Self {
            tree: OrderTree::with_heap_batch(pool, heap_batch),
        }
    }

    /// Pool this multiset reports to
    pub fn pool(&self) -> &Arc<Pool> {
        self.tree.pool()
    }

    /// Ensure at least `count` free node slots with one heap slab at most
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        self.tree.reserve(count)
    }

    /// Insert a value; duplicates always succeed
    pub fn insert(&mut self, value: K) -> Result<()> {
        self.tree.insert_multi(value, ())
    }

    pub fn contains(&self, value: &K) -> bool {
        self.tree.contains(value)
    }

    /// Number of copies of this value
    pub fn count(&self, value: &K) -> usize {
        self.tree.count(value)
    }

    /// Remove one copy of this value; returns whether one was present
    pub fn remove_one(&mut self, value: &K) -> bool {
        self.tree.remove(value).is_some()
    }

    /// Remove every copy of this value; returns how many went
    pub fn remove_all(&mut self, value: &K) -> usize {
        self.tree.remove_all(value)
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

    /// Iterate values in ascending order
    pub fn iter(&self) -> SetIter<'_, K, STACK> {
        SetIter {
            inner: self.tree.iter(),
        }
    }
}

impl<K: Ord + Clone, const STACK: usize> SlabMultiset<K, STACK> {
    /// Copy every value into a fresh multiset on the same pool
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::new(self.pool().clone());
        for value in self.iter() {
            clone.insert(value.clone())?;
        }
        Ok(clone)
    }
}

impl<K: Ord + Clone, const STACK: usize> Clone for SlabMultiset<K, STACK> {
    fn clone(&self) -> Self {
        self.try_clone()
            .expect("pool limit exceeded while cloning multiset")
    }
}

impl<K: Ord + fmt::Debug, const STACK: usize> fmt::Debug for SlabMultiset<K, STACK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over set values in ascending order
pub struct SetIter<'a, K, const STACK: usize> {
    inner: TreeIter<'a, K, (), STACK>,
}

impl<'a, K, const STACK: usize> Iterator for SetIter<'a, K, STACK> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }
}
