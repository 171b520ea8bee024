//! Pool accounting service
//!
//! A [`Pool`] tracks how many slabs, slots and bytes the containers
//! attached to it currently hold. Allocators report four events:
//!
//! - [`slab_new`](Pool::slab_new) / [`slab_delete`](Pool::slab_delete)
//!   when a slab (inline or heap) enters or leaves service,
//! - [`item_allocate`](Pool::item_allocate) / [`item_free`](Pool::item_free)
//!   when a single slot is handed out or returned.
//!
//! `slab_new` doubles as the admission check: a pool constructed with
//! [`Pool::with_limit`] refuses heap slabs that would push its total past
//! the byte limit, and the allocator surfaces that as
//! [`Error::OutOfMemory`]. Inline slabs are part of the container object
//! itself and are never refused.

use crate::error::{Error, Result};
use crate::mempool::PoolStats;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Per-pool memory accounting
///
/// Cheap to share: containers hold an `Arc<Pool>` and update the counters
/// with relaxed atomics. The pool never allocates storage on behalf of a
/// container; it only counts and admits.
#[derive(Debug)]
pub struct Pool {
    name: String,
    /// Byte budget for heap slabs; `None` means unlimited
    limit_bytes: Option<usize>,
    slabs: AtomicUsize,
    free_items: AtomicUsize,
    inuse_items: AtomicUsize,
    free_bytes: AtomicUsize,
    inuse_bytes: AtomicUsize,
}

impl Pool {
    /// Create an unlimited pool
    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, None)
    }

    /// Create a pool that refuses heap slabs beyond `limit` total bytes
    pub fn with_limit(name: &str, limit: usize) -> Arc<Self> {
        Self::build(name, Some(limit))
    }

    fn build(name: &str, limit_bytes: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            limit_bytes,
            slabs: AtomicUsize::new(0),
            free_items: AtomicUsize::new(0),
            inuse_items: AtomicUsize::new(0),
            free_bytes: AtomicUsize::new(0),
            inuse_bytes: AtomicUsize::new(0),
        })
    }

    /// Pool name, for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a slab entering service
    ///
    /// # Arguments
    /// * `header_size` - bytes of slab bookkeeping, attributed to `free_bytes`
    /// * `slot_size` - bytes per slot
    /// * `count` - number of slots in the slab
    /// * `heap` - false for inline slabs (part of the container object)
    /// * `contiguous` - true for vector buffers, false for node slabs
    ///
    /// Heap slabs are subject to the pool's byte limit; inline
    /// registrations never fail.
    pub fn slab_new(
        &self,
        header_size: usize,
        slot_size: usize,
        count: usize,
        heap: bool,
        contiguous: bool,
    ) -> Result<()> {
        let bytes = header_size + slot_size * count;
        if heap {
            if let Some(limit) = self.limit_bytes {
                // Admission check, only for memory we are about to obtain
                if self.allocated_bytes() + bytes > limit {
                    return Err(Error::OutOfMemory {
                        pool: self.name.clone(),
                        requested: bytes,
                        limit,
                    });
                }
            }
        }

        self.slabs.fetch_add(1, Ordering::Relaxed);
        self.free_items.fetch_add(count, Ordering::Relaxed);
        self.free_bytes.fetch_add(bytes, Ordering::Relaxed);
        debug!(
            pool = %self.name,
            slot_size, count, heap, contiguous,
            "slab registered"
        );
        Ok(())
    }

    /// Register a slab leaving service; every slot must already be free
    pub fn slab_delete(&self, header_size: usize, slot_size: usize, count: usize) {
        let bytes = header_size + slot_size * count;
        self.slabs.fetch_sub(1, Ordering::Relaxed);
        self.free_items.fetch_sub(count, Ordering::Relaxed);
        self.free_bytes.fetch_sub(bytes, Ordering::Relaxed);
        debug!(pool = %self.name, slot_size, count, "slab retired");
    }

    /// One slot handed out
    pub fn item_allocate(&self, slot_size: usize) {
        self.free_items.fetch_sub(1, Ordering::Relaxed);
        self.inuse_items.fetch_add(1, Ordering::Relaxed);
        self.free_bytes.fetch_sub(slot_size, Ordering::Relaxed);
        self.inuse_bytes.fetch_add(slot_size, Ordering::Relaxed);
    }

    /// One slot returned
    pub fn item_free(&self, slot_size: usize) {
        self.inuse_items.fetch_sub(1, Ordering::Relaxed);
        self.free_items.fetch_add(1, Ordering::Relaxed);
        self.inuse_bytes.fetch_sub(slot_size, Ordering::Relaxed);
        self.free_bytes.fetch_add(slot_size, Ordering::Relaxed);
    }

    /// Number of slabs currently registered
    pub fn slabs(&self) -> usize {
        self.slabs.load(Ordering::Relaxed)
    }

    /// Slots sitting on free lists
    pub fn free_items(&self) -> usize {
        self.free_items.load(Ordering::Relaxed)
    }

    /// Live container nodes
    pub fn inuse_items(&self) -> usize {
        self.inuse_items.load(Ordering::Relaxed)
    }

    /// Bytes backing free slots
    pub fn free_bytes(&self) -> usize {
        self.free_bytes.load(Ordering::Relaxed)
    }

    /// Bytes backing live nodes
    pub fn inuse_bytes(&self) -> usize {
        self.inuse_bytes.load(Ordering::Relaxed)
    }

    /// Total slots owned by the pool's slabs
    pub fn allocated_items(&self) -> usize {
        self.free_items() + self.inuse_items()
    }

    /// Total bytes owned by the pool's slabs
    pub fn allocated_bytes(&self) -> usize {
        self.free_bytes() + self.inuse_bytes()
    }

    /// Snapshot all counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slabs: self.slabs(),
            free_items: self.free_items(),
            inuse_items: self.inuse_items(),
            free_bytes: self.free_bytes(),
            inuse_bytes: self.inuse_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_empty() {
        let pool = Pool::new("unit");
        assert_eq!(pool.slabs(), 0);
        assert_eq!(pool.allocated_items(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_slab_and_item_accounting() {
        let pool = Pool::new("unit");

        // A slab with 4 slots of 32 bytes plus a 16 byte header
        pool.slab_new(16, 32, 4, false, false).unwrap();
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.free_items(), 4);
        assert_eq!(pool.free_bytes(), 16 + 32 * 4);
        assert_eq!(pool.inuse_items(), 0);

        // Hand out two slots
        pool.item_allocate(32);
        pool.item_allocate(32);
        assert_eq!(pool.free_items(), 2);
        assert_eq!(pool.inuse_items(), 2);
        assert_eq!(pool.inuse_bytes(), 64);
        assert_eq!(pool.allocated_items(), 4);

        // Return them and retire the slab
        pool.item_free(32);
        pool.item_free(32);
        pool.slab_delete(16, 32, 4);
        assert_eq!(pool.slabs(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_limit_refuses_heap_slabs() {
        let pool = Pool::with_limit("unit", 100);

        // Inline slabs are never refused, even past the limit
        pool.slab_new(0, 64, 4, false, false).unwrap();
        assert_eq!(pool.allocated_bytes(), 256);

        // Heap slabs are
        let err = pool.slab_new(0, 64, 4, true, false).unwrap_err();
        match err {
            Error::OutOfMemory {
                requested, limit, ..
            } => {
                assert_eq!(requested, 256);
                assert_eq!(limit, 100);
            }
        }
        // Refusal leaves the counters untouched
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.allocated_bytes(), 256);
    }

    #[test]
    fn test_stats_snapshot() {
        let pool = Pool::new("unit");
        pool.slab_new(8, 16, 2, false, false).unwrap();
        pool.item_allocate(16);

        let stats = pool.stats();
        assert_eq!(stats.slabs, 1);
        assert_eq!(stats.free_items, 1);
        assert_eq!(stats.inuse_items, 1);
        assert_eq!(stats.allocated_items(), 2);
    }
}
