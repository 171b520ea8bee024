//! Slot storage and handles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-list terminator for slot indices within a slab
pub(crate) const NIL: u32 = u32::MAX;

/// Handle to one live slot
///
/// Identifies the owning slab (0 is always the inline slab) and the slot
/// within it. A `SlabRef` is only meaningful to the allocator that issued
/// it; handles never survive the slot they name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlabRef {
    /// Owning slab id (0 = inline slab)
    pub slab: u32,
    /// Slot index within the slab
    pub slot: u32,
}

impl SlabRef {
    /// Create a new slot handle
    pub fn new(slab: u32, slot: u32) -> Self {
        Self { slab, slot }
    }

    /// Whether the slot lives in the container's inline slab
    pub fn is_inline(&self) -> bool {
        self.slab == 0
    }
}

impl fmt::Display for SlabRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(slab={}, slot={})", self.slab, self.slot)
    }
}

/// One slot of node storage
///
/// A vacant slot carries the index of the next free slot in the same slab,
/// forming the slab's intrusive free list; an occupied slot holds exactly
/// one container node.
#[derive(Debug)]
pub enum Slot<T> {
    /// Free; `next` is the next free slot index in this slab, or [`NIL`]
    Vacant { next: u32 },
    /// Holds one live node
    Occupied(T),
}

impl<T> Slot<T> {
    /// Whether this slot currently holds a node
    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_ref_creation() {
        let r = SlabRef::new(3, 17);
        assert_eq!(r.slab, 3);
        assert_eq!(r.slot, 17);
        assert!(!r.is_inline());
        assert!(SlabRef::new(0, 2).is_inline());
    }

    #[test]
    fn test_slab_ref_display() {
        let r = SlabRef::new(1, 4);
        assert_eq!(r.to_string(), "Slot(slab=1, slot=4)");
    }

    #[test]
    fn test_slot_occupancy() {
        let vacant: Slot<u64> = Slot::Vacant { next: NIL };
        let occupied = Slot::Occupied(42u64);
        assert!(!vacant.is_occupied());
        assert!(occupied.is_occupied());
    }
}
