//! Contiguous-buffer allocator
//!
//! Backing storage for [`SlabVec`](crate::containers::SlabVec). Much
//! simpler than the node allocator: there is no free list, just one
//! inline buffer of `STACK` elements and, for anything larger, a single
//! heap buffer sized to the exact request. Buffers are reported to the
//! pool with `contiguous = true`.

use crate::error::Result;
use crate::mempool::Pool;
use std::mem::{self, MaybeUninit};
use std::sync::Arc;

/// A buffer handed out by [`BufferAllocator`]
///
/// Either the allocator's own inline storage or an owned heap block.
/// Element initialization is tracked by the vector above; the allocator
/// only moves raw capacity around.
pub enum RawBuffer<T> {
    /// The allocator's inline storage
    Inline,
    /// A heap block of exactly the requested capacity
    Heap(Box<[MaybeUninit<T>]>),
}

impl<T> std::fmt::Debug for RawBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawBuffer::Inline => f.write_str("RawBuffer::Inline"),
            RawBuffer::Heap(buf) => f
                .debug_tuple("RawBuffer::Heap")
                .field(&format_args!("[capacity {}]", buf.len()))
                .finish(),
        }
    }
}

impl<T> RawBuffer<T> {
    /// Whether this is the inline buffer
    pub fn is_inline(&self) -> bool {
        matches!(self, RawBuffer::Inline)
    }
}

/// Inline-first allocator for one growable contiguous buffer
///
/// Requests of up to `STACK` elements are satisfied from storage embedded
/// in the allocator; larger requests get a heap block of exactly the
/// requested size. Returning the inline buffer is a no-op.
pub struct BufferAllocator<T, const STACK: usize> {
    pool: Arc<Pool>,
    inline: [MaybeUninit<T>; STACK],
}

impl<T, const STACK: usize> BufferAllocator<T, STACK> {
    /// Create the allocator and register its inline buffer with the pool
    pub fn new(pool: Arc<Pool>) -> Self {
        pool.slab_new(0, mem::size_of::<T>(), STACK, false, true)
            .expect("inline buffer registration cannot fail");
        Self {
            pool,
            // SAFETY: an array of MaybeUninit does not require
            // initialization; nothing reads these cells until the vector
            // above has written them.
            inline: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    /// Pool this allocator reports to
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Obtain capacity for `count` elements
    ///
    /// Inline when it fits, otherwise a pool-admitted heap block of
    /// exactly `count` elements.
    pub fn allocate(&mut self, count: usize) -> Result<RawBuffer<T>> {
        if count <= STACK {
            return Ok(RawBuffer::Inline);
        }
        self.pool
            .slab_new(0, mem::size_of::<T>(), count, true, true)?;
        let mut storage = Vec::with_capacity(count);
        // SAFETY: the elements are MaybeUninit and need no initialization;
        // len == capacity so the boxed slice covers the whole block.
        unsafe {
            storage.set_len(count);
        }
        Ok(RawBuffer::Heap(storage.into_boxed_slice()))
    }

    /// Return a buffer; the caller must already have destroyed its elements
    pub fn deallocate(&mut self, buffer: RawBuffer<T>) {
        match buffer {
            RawBuffer::Inline => {}
            RawBuffer::Heap(storage) => {
                self.pool
                    .slab_delete(0, mem::size_of::<T>(), storage.len());
            }
        }
    }

    /// Capacity of a buffer handed out by this allocator
    pub fn capacity_of(&self, buffer: &RawBuffer<T>) -> usize {
        match buffer {
            RawBuffer::Inline => STACK,
            RawBuffer::Heap(storage) => storage.len(),
        }
    }

    /// View a buffer's cells
    pub fn cells<'a>(&'a self, buffer: &'a RawBuffer<T>) -> &'a [MaybeUninit<T>] {
        match buffer {
            RawBuffer::Inline => &self.inline,
            RawBuffer::Heap(storage) => storage,
        }
    }

    /// Mutably view a buffer's cells
    pub fn cells_mut<'a>(&'a mut self, buffer: &'a mut RawBuffer<T>) -> &'a mut [MaybeUninit<T>] {
        match buffer {
            RawBuffer::Inline => &mut self.inline,
            RawBuffer::Heap(storage) => storage,
        }
    }
}

impl<T, const STACK: usize> Drop for BufferAllocator<T, STACK> {
    fn drop(&mut self) {
        // Inline buffer retirement notification; the storage itself is
        // part of the enclosing object and needs no release.
        self.pool.slab_delete(0, mem::size_of::<T>(), STACK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_when_it_fits() {
        let pool = Pool::new("unit");
        let mut allocator: BufferAllocator<u32, 4> = BufferAllocator::new(pool.clone());
        assert_eq!(pool.allocated_items(), 4);
        assert_eq!(pool.slabs(), 1);

        let buffer = allocator.allocate(3).unwrap();
        assert!(buffer.is_inline());
        assert_eq!(allocator.capacity_of(&buffer), 4);

        // Returning the inline buffer changes nothing
        allocator.deallocate(buffer);
        assert_eq!(pool.slabs(), 1);
    }

    #[test]
    fn test_heap_for_larger_requests() {
        let pool = Pool::new("unit");
        let mut allocator: BufferAllocator<u32, 4> = BufferAllocator::new(pool.clone());

        let buffer = allocator.allocate(10).unwrap();
        assert!(!buffer.is_inline());
        assert_eq!(allocator.capacity_of(&buffer), 10);
        assert_eq!(pool.slabs(), 2);
        assert_eq!(pool.allocated_items(), 14);

        allocator.deallocate(buffer);
        assert_eq!(pool.slabs(), 1);
        assert_eq!(pool.allocated_items(), 4);
    }

    #[test]
    fn test_drop_retires_inline_registration() {
        let pool = Pool::new("unit");
        let allocator: BufferAllocator<u64, 8> = BufferAllocator::new(pool.clone());
        drop(allocator);
        assert_eq!(pool.slabs(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_limit_refuses_heap_buffers() {
        let pool = Pool::with_limit("unit", 32);
        let mut allocator: BufferAllocator<u64, 2> = BufferAllocator::new(pool.clone());

        assert!(allocator.allocate(2).is_ok());
        let err = allocator.allocate(16).unwrap_err();
        assert!(matches!(err, crate::error::Error::OutOfMemory { .. }));
    }
}
