//! Node-slab allocator
//!
//! Hands out single slots for container nodes. The first `STACK` slots
//! live inside the allocator object itself; once those are gone, further
//! slots come from heap slabs obtained in batches and released as a whole
//! when every slot in them is free again.
//!
//! Slots never move between slabs and never leave the allocator that
//! issued them - the containers above are written so that no operation
//! can carry a node from one allocator to another. The destructor checks
//! that contract and treats a violation as fatal.

use crate::error::Result;
use crate::mempool::Pool;
use crate::slab::slot::{SlabRef, Slot, NIL};
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, error};

/// Slab id of the inline slab
const INLINE: u32 = 0;

/// Per-slab bookkeeping
#[derive(Debug)]
struct SlabHeader {
    /// Number of slots in this slab
    size: u32,
    /// Number of currently free slots
    free_slots: u32,
    /// Head of the slab's intrusive free list, [`NIL`] when fully in use
    free_head: u32,
    /// Free-slab list links (slab ids), [`NIL`] when unlisted
    prev: u32,
    next: u32,
}

/// Header bytes reported to the pool per slab
const HEADER_SIZE: usize = mem::size_of::<SlabHeader>();

impl SlabHeader {
    /// Header for a freshly built slab whose slots are chained 0 → size-1
    fn new(size: u32) -> Self {
        Self {
            size,
            free_slots: size,
            free_head: if size > 0 { 0 } else { NIL },
            prev: NIL,
            next: NIL,
        }
    }
}

/// A slab obtained from the heap; dropped wholesale once fully free
struct HeapSlab<T> {
    header: SlabHeader,
    slots: Box<[Slot<T>]>,
}

/// Build the slot array for a new slab: every slot vacant, chained in order
fn vacant_chain<T>(capacity: usize) -> impl Iterator<Item = Slot<T>> {
    (0..capacity).map(move |i| Slot::Vacant {
        next: if i + 1 < capacity { (i + 1) as u32 } else { NIL },
    })
}

/// Inline-first slab allocator for fixed-size container nodes
///
/// `STACK` slots are embedded in the allocator (and therefore in the
/// container that owns it); heap slabs default to roughly 256 bytes of
/// slot storage each, and [`reserve`](Self::reserve) can create larger
/// ones. All slot bookkeeping is reported to the owning [`Pool`].
pub struct SlabAllocator<T, const STACK: usize> {
    pool: Arc<Pool>,
    /// Slot count for heap slabs created when the free list runs dry
    heap_batch: usize,
    /// Cached slot size in bytes; fixed for the allocator's lifetime
    slot_size: usize,
    /// Free slots across all slabs
    free_slots: usize,
    /// Slots owned across all slabs, free or not
    alloc_slots: usize,
    /// Head of the list of slabs with at least one free slot
    free_list: u32,
    inline_header: SlabHeader,
    inline_slots: [Slot<T>; STACK],
    /// Heap slab table; slab id `i` lives at `heap[i - 1]`
    heap: Vec<Option<HeapSlab<T>>>,
    /// Released slab ids available for reuse
    spare_ids: Vec<u32>,
}

impl<T, const STACK: usize> SlabAllocator<T, STACK> {
    /// Create an allocator with the default heap batch size
    pub fn new(pool: Arc<Pool>) -> Self {
        let slot_size = mem::size_of::<Slot<T>>();
        Self::with_heap_batch(pool, default_heap_batch(slot_size))
    }

    /// Create an allocator that obtains heap slabs of `heap_batch` slots
    pub fn with_heap_batch(pool: Arc<Pool>, heap_batch: usize) -> Self {
        let slot_size = mem::size_of::<Slot<T>>();

        // Inline registration is pure accounting and never fails
        pool.slab_new(HEADER_SIZE, slot_size, STACK, false, false)
            .expect("inline slab registration cannot fail");

        let mut allocator = Self {
            pool,
            heap_batch: heap_batch.max(1),
            slot_size,
            free_slots: STACK,
            alloc_slots: STACK,
            free_list: NIL,
            inline_header: SlabHeader::new(STACK as u32),
            inline_slots: std::array::from_fn(|i| Slot::Vacant {
                next: if i + 1 < STACK { (i + 1) as u32 } else { NIL },
            }),
            heap: Vec::new(),
            spare_ids: Vec::new(),
        };
        if STACK > 0 {
            allocator.link_front(INLINE);
        }
        allocator
    }

    /// Pool this allocator reports to
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Free slots currently available without touching the heap
    pub fn free_slot_count(&self) -> usize {
        self.free_slots
    }

    /// Slots owned by this allocator, free or in use
    pub fn allocated_slot_count(&self) -> usize {
        self.alloc_slots
    }

    /// Live slots handed out and not yet returned
    pub fn in_use(&self) -> usize {
        self.alloc_slots - self.free_slots
    }

    /// Store one node, growing by a heap slab if no slot is free
    pub fn insert(&mut self, value: T) -> Result<SlabRef> {
        if self.free_list == NIL {
            self.add_slab(self.heap_batch)?;
        }

        let id = self.free_list;
        let now_full;
        let idx;
        {
            let (header, slots) = self.slab_parts_mut(id);
            idx = header.free_head;
            debug_assert!(idx != NIL, "slab on the free list with no free slots");
            let slot = &mut slots[idx as usize];
            header.free_head = match mem::replace(slot, Slot::Occupied(value)) {
                Slot::Vacant { next } => next,
                Slot::Occupied(_) => {
                    panic!("free-list corruption: slab {} lists occupied slot {}", id, idx)
                }
            };
            header.free_slots -= 1;
            now_full = header.free_slots == 0;
        }

        // A dry slab leaves the free-slab list; the inline slab included
        if now_full {
            self.unlink(id);
        }
        self.free_slots -= 1;
        self.pool.item_allocate(self.slot_size);
        Ok(SlabRef::new(id, idx))
    }

    /// Return a node's slot and recover the value
    ///
    /// Panics if the handle does not name a live slot of this allocator;
    /// that means a double free or a handle from another allocator, both
    /// unrecoverable.
    pub fn remove(&mut self, r: SlabRef) -> T {
        let was_full;
        let now_empty;
        let value;
        {
            let (header, slots) = self.slab_parts_mut(r.slab);
            let slot = match slots.get_mut(r.slot as usize) {
                Some(slot) => slot,
                None => panic!("{} is out of range for its slab", r),
            };
            was_full = header.free_slots == 0;
            value = match mem::replace(slot, Slot::Vacant { next: header.free_head }) {
                Slot::Occupied(value) => value,
                Slot::Vacant { .. } => panic!("{} does not name a live slot (double free?)", r),
            };
            header.free_head = r.slot;
            header.free_slots += 1;
            now_empty = header.free_slots == header.size;
        }

        self.free_slots += 1;
        self.pool.item_free(self.slot_size);
        if was_full {
            self.link_front(r.slab);
        }
        // A fully free heap slab goes back to the pool in one piece
        if now_empty && r.slab != INLINE {
            self.release_slab(r.slab);
        }
        value
    }

    /// Borrow the node behind a handle
    pub fn get(&self, r: SlabRef) -> &T {
        match self.slot(r) {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("{} does not name a live slot", r),
        }
    }

    /// Mutably borrow the node behind a handle
    pub fn get_mut(&mut self, r: SlabRef) -> &mut T {
        match self.slot_mut(r) {
            Slot::Occupied(value) => value,
            Slot::Vacant { .. } => panic!("{} does not name a live slot", r),
        }
    }

    /// Whether `r` names a live slot of this allocator
    pub fn contains(&self, r: SlabRef) -> bool {
        let slots: &[Slot<T>] = if r.slab == INLINE {
            &self.inline_slots
        } else {
            match self.heap.get(r.slab as usize - 1).and_then(|s| s.as_ref()) {
                Some(slab) => &slab.slots,
                None => return false,
            }
        };
        slots
            .get(r.slot as usize)
            .map_or(false, Slot::is_occupied)
    }

    /// Ensure at least `count` free slots, adding at most one heap slab
    pub fn reserve(&mut self, count: usize) -> Result<()> {
        if self.free_slots < count {
            self.add_slab(count - self.free_slots)?;
        }
        Ok(())
    }

    fn slot(&self, r: SlabRef) -> &Slot<T> {
        let slots: &[Slot<T>] = if r.slab == INLINE {
            &self.inline_slots
        } else {
            match self.heap.get(r.slab as usize - 1).and_then(|s| s.as_ref()) {
                Some(slab) => &slab.slots,
                None => panic!("{} refers to a released slab", r),
            }
        };
        match slots.get(r.slot as usize) {
            Some(slot) => slot,
            None => panic!("{} is out of range for its slab", r),
        }
    }

    fn slot_mut(&mut self, r: SlabRef) -> &mut Slot<T> {
        let slots: &mut [Slot<T>] = if r.slab == INLINE {
            &mut self.inline_slots
        } else {
            match self.heap.get_mut(r.slab as usize - 1).and_then(|s| s.as_mut()) {
                Some(slab) => &mut slab.slots,
                None => panic!("{} refers to a released slab", r),
            }
        };
        match slots.get_mut(r.slot as usize) {
            Some(slot) => slot,
            None => panic!("{} is out of range for its slab", r),
        }
    }

    fn slab_parts_mut(&mut self, id: u32) -> (&mut SlabHeader, &mut [Slot<T>]) {
        if id == INLINE {
            (&mut self.inline_header, &mut self.inline_slots)
        } else {
            let slab = self.heap[id as usize - 1]
                .as_mut()
                .expect("slab id refers to a released slab");
            (&mut slab.header, &mut slab.slots)
        }
    }

    fn header(&self, id: u32) -> &SlabHeader {
        if id == INLINE {
            &self.inline_header
        } else {
            &self.heap[id as usize - 1]
                .as_ref()
                .expect("slab id refers to a released slab")
                .header
        }
    }

    fn header_mut(&mut self, id: u32) -> &mut SlabHeader {
        if id == INLINE {
            &mut self.inline_header
        } else {
            &mut self.heap[id as usize - 1]
                .as_mut()
                .expect("slab id refers to a released slab")
                .header
        }
    }

    /// Put `id` at the head of the free-slab list
    fn link_front(&mut self, id: u32) {
        let old_head = self.free_list;
        {
            let header = self.header_mut(id);
            header.prev = NIL;
            header.next = old_head;
        }
        if old_head != NIL {
            self.header_mut(old_head).prev = id;
        }
        self.free_list = id;
    }

    /// Take `id` off the free-slab list
    fn unlink(&mut self, id: u32) {
        let (prev, next) = {
            let header = self.header(id);
            (header.prev, header.next)
        };
        if prev != NIL {
            self.header_mut(prev).next = next;
        } else {
            self.free_list = next;
        }
        if next != NIL {
            self.header_mut(next).prev = prev;
        }
        let header = self.header_mut(id);
        header.prev = NIL;
        header.next = NIL;
    }

    /// Obtain one heap slab of `capacity` slots and put it in service
    fn add_slab(&mut self, capacity: usize) -> Result<()> {
        let capacity = capacity.max(1);
        self.pool
            .slab_new(HEADER_SIZE, self.slot_size, capacity, true, false)?;

        let slab = HeapSlab {
            header: SlabHeader::new(capacity as u32),
            slots: vacant_chain(capacity).collect(),
        };
        let id = match self.spare_ids.pop() {
            Some(id) => {
                self.heap[id as usize - 1] = Some(slab);
                id
            }
            None => {
                self.heap.push(Some(slab));
                self.heap.len() as u32
            }
        };
        self.link_front(id);
        self.free_slots += capacity;
        self.alloc_slots += capacity;
        debug!(pool = %self.pool.name(), slab = id, capacity, "added heap slab");
        Ok(())
    }

    /// Drop a fully free heap slab and give its id back for reuse
    fn release_slab(&mut self, id: u32) {
        self.unlink(id);
        let slab = self.heap[id as usize - 1]
            .take()
            .expect("releasing a slab twice");
        debug_assert_eq!(slab.header.free_slots, slab.header.size);
        let count = slab.header.size as usize;
        self.free_slots -= count;
        self.alloc_slots -= count;
        self.pool.slab_delete(HEADER_SIZE, self.slot_size, count);
        self.spare_ids.push(id);
        debug!(pool = %self.pool.name(), slab = id, count, "released empty heap slab");
    }
}

impl<T, const STACK: usize> fmt::Debug for SlabAllocator<T, STACK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabAllocator")
            .field("pool", &self.pool.name())
            .field("stack", &STACK)
            .field("heap_batch", &self.heap_batch)
            .field("free_slots", &self.free_slots)
            .field("alloc_slots", &self.alloc_slots)
            .finish()
    }
}

impl<T, const STACK: usize> Drop for SlabAllocator<T, STACK> {
    fn drop(&mut self) {
        let live = self.alloc_slots - self.free_slots;
        if live > 0 {
            // A node outlived its container: some operation let a slot
            // escape. The internal link graph can no longer be trusted.
            if std::thread::panicking() {
                error!(
                    pool = %self.pool.name(),
                    live, "allocator dropped with live slots while panicking"
                );
                return;
            }
            panic!(
                "slab allocator dropped with {} live slots; a node escaped its container",
                live
            );
        }

        // Heap slabs retained by reserve batching go back to the pool now
        for i in 0..self.heap.len() {
            if self.heap[i].is_some() {
                self.release_slab(i as u32 + 1);
            }
        }
        debug_assert_eq!(self.free_slots, STACK);
        debug_assert_eq!(self.alloc_slots, STACK);

        // Inline slab retirement notification
        self.pool.slab_delete(HEADER_SIZE, self.slot_size, STACK);
    }
}

/// Heap slabs target roughly 256 bytes of slot storage, never less than
/// one slot
fn default_heap_batch(slot_size: usize) -> usize {
    const TARGET_SLAB_BYTES: usize = 256;
    (TARGET_SLAB_BYTES / slot_size.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_counters() {
        let pool = Pool::new("unit");
        let allocator: SlabAllocator<u64, 4> = SlabAllocator::new(pool.clone());

        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.allocated_items(), 4);
        assert_eq!(pool.inuse_items(), 0);
        assert_eq!(allocator.free_slot_count(), 4);
        assert_eq!(allocator.allocated_slot_count(), 4);

        drop(allocator);
        assert_eq!(pool.slabs(), 0);
        assert_eq!(pool.allocated_items(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_insert_get_remove() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<String, 4> = SlabAllocator::new(pool.clone());

        let r = allocator.insert("hello".to_string()).unwrap();
        assert!(r.is_inline());
        assert_eq!(allocator.get(r), "hello");
        assert_eq!(pool.inuse_items(), 1);

        allocator.get_mut(r).push_str(", slab");
        assert_eq!(allocator.get(r), "hello, slab");

        let value = allocator.remove(r);
        assert_eq!(value, "hello, slab");
        assert_eq!(pool.inuse_items(), 0);
        assert_eq!(pool.allocated_items(), 4);
    }

    #[test]
    fn test_slot_reuse_is_lifo() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u32, 4> = SlabAllocator::new(pool);

        let a = allocator.insert(1).unwrap();
        let _b = allocator.insert(2).unwrap();
        allocator.remove(a);

        // The freed slot is the next one handed out
        let c = allocator.insert(3).unwrap();
        assert_eq!(c, a);
        assert_eq!(*allocator.get(c), 3);

        allocator.remove(_b);
        allocator.remove(c);
    }

    #[test]
    fn test_overflow_to_heap_and_release() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u64, 2> = SlabAllocator::with_heap_batch(pool.clone(), 3);

        let mut handles = Vec::new();
        for i in 0..5u64 {
            handles.push(allocator.insert(i).unwrap());
        }
        // 2 inline + one heap slab of 3
        assert_eq!(pool.slabs(), 2);
        assert_eq!(pool.allocated_items(), 5);
        assert_eq!(pool.inuse_items(), 5);
        assert!(handles[0].is_inline());
        assert!(handles[1].is_inline());
        assert!(!handles[2].is_inline());

        // Draining the heap slab releases it wholesale
        for r in handles.drain(2..) {
            allocator.remove(r);
        }
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.allocated_items(), 2);
        assert_eq!(pool.inuse_items(), 2);

        for r in handles {
            allocator.remove(r);
        }
        assert_eq!(pool.inuse_items(), 0);
    }

    #[test]
    fn test_inline_slab_is_never_released() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u8, 3> = SlabAllocator::new(pool.clone());

        let handles: Vec<_> = (0..3).map(|i| allocator.insert(i).unwrap()).collect();
        for r in handles {
            allocator.remove(r);
        }
        // Fully free again, but the inline slab stays registered
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.allocated_items(), 3);
    }

    #[test]
    fn test_reserve_makes_one_slab() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u64, 4> = SlabAllocator::new(pool.clone());

        // 4 free inline; reserving 9 adds one slab of exactly 5
        allocator.reserve(9).unwrap();
        assert_eq!(pool.slabs(), 2);
        assert_eq!(allocator.free_slot_count(), 9);
        assert_eq!(pool.free_items(), 9);

        // Enough slots already: a second reserve is a no-op
        allocator.reserve(9).unwrap();
        assert_eq!(pool.slabs(), 2);
        assert_eq!(allocator.free_slot_count(), 9);

        // Drop releases the reserve-only slab cleanly
        drop(allocator);
        assert_eq!(pool.slabs(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_pool_limit_surfaces_out_of_memory() {
        // Room for the inline slab only
        let pool = Pool::with_limit("unit", 64);
        let mut allocator: SlabAllocator<u64, 2> = SlabAllocator::with_heap_batch(pool.clone(), 8);

        let a = allocator.insert(1).unwrap();
        let b = allocator.insert(2).unwrap();
        let err = allocator.insert(3).unwrap_err();
        assert!(matches!(err, crate::error::Error::OutOfMemory { .. }));

        // The allocator stays usable within its admitted slots
        allocator.remove(a);
        let c = allocator.insert(4).unwrap();
        assert_eq!(*allocator.get(c), 4);
        allocator.remove(b);
        allocator.remove(c);
    }

    #[test]
    fn test_contains_tracks_liveness() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u32, 2> = SlabAllocator::new(pool);

        let r = allocator.insert(7).unwrap();
        assert!(allocator.contains(r));
        allocator.remove(r);
        assert!(!allocator.contains(r));
        assert!(!allocator.contains(SlabRef::new(9, 0)));
    }

    #[test]
    fn test_slab_id_reuse_after_release() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u64, 1> = SlabAllocator::with_heap_batch(pool.clone(), 2);

        let a = allocator.insert(0).unwrap();
        let b = allocator.insert(1).unwrap();
        let heap_id = b.slab;
        assert_ne!(heap_id, 0);

        // Empty the heap slab, then overflow again: the id comes back
        allocator.remove(b);
        assert_eq!(pool.slabs(), 1);
        let c = allocator.insert(2).unwrap();
        assert_eq!(c.slab, heap_id);

        allocator.remove(a);
        allocator.remove(c);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u32, 2> = SlabAllocator::new(pool);
        let r = allocator.insert(1).unwrap();
        allocator.remove(r);
        allocator.remove(r);
    }

    #[test]
    #[should_panic(expected = "live slots")]
    fn test_drop_with_live_slots_panics() {
        let pool = Pool::new("unit");
        let mut allocator: SlabAllocator<u32, 2> = SlabAllocator::new(pool);
        let _r = allocator.insert(1).unwrap();
        drop(allocator);
    }
}
