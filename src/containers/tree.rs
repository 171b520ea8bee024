//! Ordered tree core
//!
//! One AVL tree implementation backs all four ordered associative
//! containers; map/multimap/set/multiset differ only in their facade and
//! in whether equal keys may coexist. Nodes live in a
//! [`SlabAllocator`] and reference each other by [`SlabRef`] handle, so
//! the whole tree - allocator included - can be moved freely.
//!
//! Duplicate handling: multi-mode inserts descend right on an equal key,
//! which places every duplicate after its equals in iteration order.
//! Rotations never change the in-order sequence, so duplicates stay in
//! insertion order for the tree's lifetime. Equal keys can still end up
//! in either subtree of another equal key, which is why lookups that must
//! see every duplicate (count, remove_all) recurse both sides of an equal
//! match.

use crate::error::Result;
use crate::mempool::Pool;
use crate::slab::{SlabAllocator, SlabRef};
use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

type Link = Option<SlabRef>;

/// One tree node; `height` is the AVL height of its subtree
pub(crate) struct TreeNode<K, V> {
    key: K,
    value: V,
    left: Link,
    right: Link,
    height: u16,
}

/// AVL tree over slab-allocated nodes
pub(crate) struct OrderTree<K, V, const STACK: usize> {
    alloc: SlabAllocator<TreeNode<K, V>, STACK>,
    root: Link,
    len: usize,
}

impl<K, V, const STACK: usize> OrderTree<K, V, STACK> {
    pub(crate) fn new(pool: Arc<Pool>) -> Self {
        Self {
            alloc: SlabAllocator::new(pool),
            root: None,
            len: 0,
        }
    }

    pub(crate) fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        Self {
            alloc: SlabAllocator::with_heap_batch(pool, heap_batch),
            root: None,
            len: 0,
        }
    }

    pub(crate) fn pool(&self) -> &Arc<Pool> {
        self.alloc.pool()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forwarded to the allocator: at most one heap slab per call
    pub(crate) fn reserve(&mut self, count: usize) -> Result<()> {
        self.alloc.reserve(count)
    }

    pub(crate) fn clear(&mut self) {
        let root = self.root.take();
        self.clear_at(root);
        self.len = 0;
    }

    pub(crate) fn iter(&self) -> TreeIter<'_, K, V, STACK> {
        TreeIter::new(self)
    }

    fn clear_at(&mut self, link: Link) {
        if let Some(r) = link {
            let (left, right) = {
                let node = self.alloc.get(r);
                (node.left, node.right)
            };
            self.clear_at(left);
            self.clear_at(right);
            self.alloc.remove(r);
        }
    }
}

impl<K: Ord, V, const STACK: usize> OrderTree<K, V, STACK> {
    /// Insert with unique keys; returns the displaced value on a duplicate
    pub(crate) fn insert_unique(&mut self, key: K, value: V) -> Result<Option<V>> {
        let root = self.root;
        let (new_root, replaced) = self.insert_at(root, key, value, false)?;
        self.root = Some(new_root);
        Ok(replaced)
    }

    /// Insert allowing duplicates; equal keys keep insertion order
    pub(crate) fn insert_multi(&mut self, key: K, value: V) -> Result<()> {
        let root = self.root;
        let (new_root, _) = self.insert_at(root, key, value, true)?;
        self.root = Some(new_root);
        Ok(())
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        let mut cur = self.root;
        while let Some(r) = cur {
            let node = self.alloc.get(r);
            match key.cmp(&node.key) {
                Ordering::Less => cur = node.left,
                Ordering::Greater => cur = node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let mut cur = self.root;
        while let Some(r) = cur {
            let node = self.alloc.get(r);
            match key.cmp(&node.key) {
                Ordering::Less => cur = node.left,
                Ordering::Greater => cur = node.right,
                Ordering::Equal => return Some(&mut self.alloc.get_mut(r).value),
            }
        }
        None
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of elements with this key (duplicates may sit in both
    /// subtrees of an equal node)
    pub(crate) fn count(&self, key: &K) -> usize {
        self.count_at(self.root, key)
    }

    fn count_at(&self, link: Link, key: &K) -> usize {
        let r = match link {
            None => return 0,
            Some(r) => r,
        };
        let node = self.alloc.get(r);
        match key.cmp(&node.key) {
            Ordering::Less => self.count_at(node.left, key),
            Ordering::Greater => self.count_at(node.right, key),
            Ordering::Equal => {
                1 + self.count_at(node.left, key) + self.count_at(node.right, key)
            }
        }
    }

    /// Remove one element with this key
    pub(crate) fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let root = self.root;
        let (new_root, removed) = self.remove_at(root, key);
        self.root = new_root;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Remove every element with this key; returns how many went
    pub(crate) fn remove_all(&mut self, key: &K) -> usize {
        let mut removed = 0;
        while self.remove(key).is_some() {
            removed += 1;
        }
        removed
    }

    fn insert_at(
        &mut self,
        link: Link,
        key: K,
        value: V,
        multi: bool,
    ) -> Result<(SlabRef, Option<V>)> {
        let r = match link {
            None => {
                let r = self.alloc.insert(TreeNode {
                    key,
                    value,
                    left: None,
                    right: None,
                    height: 1,
                })?;
                self.len += 1;
                return Ok((r, None));
            }
            Some(r) => r,
        };

        let ordering = key.cmp(&self.alloc.get(r).key);
        match ordering {
            Ordering::Less => {
                let child = self.alloc.get(r).left;
                let (new_child, replaced) = self.insert_at(child, key, value, multi)?;
                self.alloc.get_mut(r).left = Some(new_child);
                Ok((self.rebalance(r), replaced))
            }
            Ordering::Greater => {
                let child = self.alloc.get(r).right;
                let (new_child, replaced) = self.insert_at(child, key, value, multi)?;
                self.alloc.get_mut(r).right = Some(new_child);
                Ok((self.rebalance(r), replaced))
            }
            Ordering::Equal if multi => {
                // Duplicates go right of their equals: insertion order
                let child = self.alloc.get(r).right;
                let (new_child, replaced) = self.insert_at(child, key, value, multi)?;
                self.alloc.get_mut(r).right = Some(new_child);
                Ok((self.rebalance(r), replaced))
            }
            Ordering::Equal => {
                // Unique mode: keep the stored key, swap the value out
                let node = self.alloc.get_mut(r);
                let old = mem::replace(&mut node.value, value);
                Ok((r, Some(old)))
            }
        }
    }

    fn remove_at(&mut self, link: Link, key: &K) -> (Link, Option<(K, V)>) {
        let r = match link {
            None => return (None, None),
            Some(r) => r,
        };

        let ordering = key.cmp(&self.alloc.get(r).key);
        match ordering {
            Ordering::Less => {
                let child = self.alloc.get(r).left;
                let (new_child, removed) = self.remove_at(child, key);
                if removed.is_none() {
                    return (Some(r), None);
                }
                self.alloc.get_mut(r).left = new_child;
                (Some(self.rebalance(r)), removed)
            }
            Ordering::Greater => {
                let child = self.alloc.get(r).right;
                let (new_child, removed) = self.remove_at(child, key);
                if removed.is_none() {
                    return (Some(r), None);
                }
                self.alloc.get_mut(r).right = new_child;
                (Some(self.rebalance(r)), removed)
            }
            Ordering::Equal => {
                let (left, right) = {
                    let node = self.alloc.get(r);
                    (node.left, node.right)
                };
                match (left, right) {
                    (None, None) => {
                        let node = self.alloc.remove(r);
                        (None, Some((node.key, node.value)))
                    }
                    (Some(child), None) | (None, Some(child)) => {
                        let node = self.alloc.remove(r);
                        (Some(child), Some((node.key, node.value)))
                    }
                    (Some(_), Some(right)) => {
                        // Two children: adopt the in-order successor's
                        // key and value, then rebalance upward
                        let (new_right, (succ_key, succ_value)) = self.take_min(right);
                        let node = self.alloc.get_mut(r);
                        let old_key = mem::replace(&mut node.key, succ_key);
                        let old_value = mem::replace(&mut node.value, succ_value);
                        node.right = new_right;
                        (Some(self.rebalance(r)), Some((old_key, old_value)))
                    }
                }
            }
        }
    }

    /// Detach the leftmost node of the subtree at `r`
    fn take_min(&mut self, r: SlabRef) -> (Link, (K, V)) {
        let (left, right) = {
            let node = self.alloc.get(r);
            (node.left, node.right)
        };
        match left {
            None => {
                let node = self.alloc.remove(r);
                (right, (node.key, node.value))
            }
            Some(l) => {
                let (new_left, kv) = self.take_min(l);
                self.alloc.get_mut(r).left = new_left;
                (Some(self.rebalance(r)), kv)
            }
        }
    }

    fn height(&self, link: Link) -> u16 {
        link.map_or(0, |r| self.alloc.get(r).height)
    }

    fn update_height(&mut self, r: SlabRef) {
        let (left, right) = {
            let node = self.alloc.get(r);
            (node.left, node.right)
        };
        let height = 1 + self.height(left).max(self.height(right));
        self.alloc.get_mut(r).height = height;
    }

    fn balance_factor(&self, r: SlabRef) -> i32 {
        let (left, right) = {
            let node = self.alloc.get(r);
            (node.left, node.right)
        };
        self.height(left) as i32 - self.height(right) as i32
    }

    fn rotate_right(&mut self, r: SlabRef) -> SlabRef {
        let l = self
            .alloc
            .get(r)
            .left
            .expect("rotate_right on a node without a left child");
        let l_right = self.alloc.get(l).right;
        self.alloc.get_mut(r).left = l_right;
        self.alloc.get_mut(l).right = Some(r);
        self.update_height(r);
        self.update_height(l);
        l
    }

    fn rotate_left(&mut self, r: SlabRef) -> SlabRef {
        let right = self
            .alloc
            .get(r)
            .right
            .expect("rotate_left on a node without a right child");
        let r_left = self.alloc.get(right).left;
        self.alloc.get_mut(r).right = r_left;
        self.alloc.get_mut(right).left = Some(r);
        self.update_height(r);
        self.update_height(right);
        right
    }

    fn rebalance(&mut self, r: SlabRef) -> SlabRef {
        self.update_height(r);
        let bf = self.balance_factor(r);
        if bf > 1 {
            let left = self
                .alloc
                .get(r)
                .left
                .expect("left-heavy node without a left child");
            if self.balance_factor(left) < 0 {
                let new_left = self.rotate_left(left);
                self.alloc.get_mut(r).left = Some(new_left);
            }
            self.rotate_right(r)
        } else if bf < -1 {
            let right = self
                .alloc
                .get(r)
                .right
                .expect("right-heavy node without a right child");
            if self.balance_factor(right) > 0 {
                let new_right = self.rotate_right(right);
                self.alloc.get_mut(r).right = Some(new_right);
            }
            self.rotate_left(r)
        } else {
            r
        }
    }
}

impl<K, V, const STACK: usize> Drop for OrderTree<K, V, STACK> {
    fn drop(&mut self) {
        // Every node must be back in its slab before the allocator's own
        // drop checks run
        self.clear();
    }
}

/// In-order iterator over an ordered container; yields entries in
/// ascending key order
pub struct TreeIter<'a, K, V, const STACK: usize> {
    tree: &'a OrderTree<K, V, STACK>,
    stack: Vec<SlabRef>,
}

impl<'a, K, V, const STACK: usize> TreeIter<'a, K, V, STACK> {
    fn new(tree: &'a OrderTree<K, V, STACK>) -> Self {
        let mut iter = Self {
            tree,
            stack: Vec::new(),
        };
        iter.push_left_spine(tree.root);
        iter
    }

    fn push_left_spine(&mut self, mut link: Link) {
        while let Some(r) = link {
            self.stack.push(r);
            link = self.tree.alloc.get(r).left;
        }
    }
}

impl<'a, K, V, const STACK: usize> Iterator for TreeIter<'a, K, V, STACK> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let r = self.stack.pop()?;
        let tree = self.tree;
        let node = tree.alloc.get(r);
        self.push_left_spine(node.right);
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tree() -> OrderTree<i32, i32, 4> {
        OrderTree::new(Pool::new("unit"))
    }

    #[test]
    fn test_insert_and_get() {
        let mut t = tree();
        for i in [5, 1, 9, 3, 7] {
            assert_eq!(t.insert_unique(i, i * 10).unwrap(), None);
        }
        assert_eq!(t.len(), 5);
        assert_eq!(t.get(&3), Some(&30));
        assert_eq!(t.get(&4), None);

        // Duplicate key displaces the value
        assert_eq!(t.insert_unique(9, 99).unwrap(), Some(90));
        assert_eq!(t.len(), 5);
        assert_eq!(t.get(&9), Some(&99));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut t = tree();
        for i in [8, 2, 6, 0, 4, 9, 1, 7, 3, 5] {
            t.insert_unique(i, -i).unwrap();
        }
        let keys: Vec<i32> = t.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_matches_reference_map() {
        let mut t = tree();
        let mut reference = BTreeMap::new();

        // Interleave inserts and removes, compare contents throughout
        for i in 0..50 {
            let key = (i * 37) % 25;
            t.insert_unique(key, i).unwrap();
            reference.insert(key, i);
            if i % 3 == 0 {
                let victim = (i * 11) % 25;
                assert_eq!(t.remove(&victim).map(|(_, v)| v), reference.remove(&victim));
            }
            assert_eq!(t.len(), reference.len());
        }
        assert!(t
            .iter()
            .map(|(k, v)| (*k, *v))
            .eq(reference.iter().map(|(k, v)| (*k, *v))));
    }

    #[test]
    fn test_remove_shapes() {
        // Leaf, one child, two children
        let mut t = tree();
        for i in [4, 2, 6, 1, 3, 5, 7] {
            t.insert_unique(i, i).unwrap();
        }
        assert_eq!(t.remove(&1).map(|(k, _)| k), Some(1)); // leaf
        assert_eq!(t.remove(&6).map(|(k, _)| k), Some(6)); // interior
        assert_eq!(t.remove(&4).map(|(k, _)| k), Some(4)); // root, two children
        assert_eq!(t.remove(&9), None);
        let keys: Vec<i32> = t.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![2, 3, 5, 7]);
    }

    #[test]
    fn test_ascending_insert_stays_balanced() {
        // Worst case for an unbalanced tree; recursion would blow the
        // stack long before 10k nodes if rotations were broken
        let mut t: OrderTree<i32, (), 4> = OrderTree::new(Pool::new("unit"));
        for i in 0..10_000 {
            t.insert_unique(i, ()).unwrap();
        }
        assert_eq!(t.len(), 10_000);
        assert_eq!(t.get(&9_999), Some(&()));
        let mut expected = 0;
        for (k, _) in t.iter() {
            assert_eq!(*k, expected);
            expected += 1;
        }
        t.clear();
        assert!(t.is_empty());
    }

    #[test]
    fn test_duplicates_keep_insertion_order() {
        let mut t: OrderTree<i32, &str, 4> = OrderTree::new(Pool::new("unit"));
        t.insert_multi(1, "a").unwrap();
        t.insert_multi(2, "x").unwrap();
        t.insert_multi(1, "b").unwrap();
        t.insert_multi(1, "c").unwrap();

        assert_eq!(t.count(&1), 3);
        assert_eq!(t.count(&2), 1);
        assert_eq!(t.count(&3), 0);

        let values: Vec<&str> = t.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["a", "b", "c", "x"]);

        assert_eq!(t.remove_all(&1), 3);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_clear_releases_nodes() {
        let pool = Pool::new("unit");
        let mut t: OrderTree<i32, i32, 4> = OrderTree::new(pool.clone());
        for i in 0..20 {
            t.insert_unique(i, i).unwrap();
        }
        assert_eq!(pool.inuse_items(), 20);

        t.clear();
        assert_eq!(pool.inuse_items(), 0);
        // Only the inline slab is left
        assert_eq!(pool.slabs(), 1);

        // clear is idempotent
        t.clear();
        assert_eq!(pool.inuse_items(), 0);
    }
}
