//! Point-in-time pool counter snapshots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of one pool's counters
///
/// Taken with [`Pool::stats`](super::Pool::stats). The snapshot is not
/// atomic across counters; individual counters are read with relaxed
/// ordering, which is exact whenever the pool's containers are at rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of slabs currently registered (inline slabs included)
    pub slabs: usize,
    /// Slots sitting on slab free lists
    pub free_items: usize,
    /// Live container nodes
    pub inuse_items: usize,
    /// Bytes backing free slots (slab headers are attributed here)
    pub free_bytes: usize,
    /// Bytes backing live nodes
    pub inuse_bytes: usize,
}

impl PoolStats {
    /// Total slots owned by the pool's slabs, free or not
    pub fn allocated_items(&self) -> usize {
        self.free_items + self.inuse_items
    }

    /// Total bytes owned by the pool's slabs
    pub fn allocated_bytes(&self) -> usize {
        self.free_bytes + self.inuse_bytes
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slabs={} items={}/{} bytes={}/{}",
            self.slabs,
            self.inuse_items,
            self.allocated_items(),
            self.inuse_bytes,
            self.allocated_bytes(),
        )
    }
}
