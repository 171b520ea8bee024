//! Small vector over the buffer allocator
//!
//! A growable contiguous sequence whose first `STACK` elements live in
//! the vector object itself. Construction wires the inline buffer in
//! immediately, so the pool shows `STACK` allocated items before the
//! first push. Growth moves to a single exact-size heap buffer; `swap`
//! first forces both sides off their inline storage and then exchanges
//! the promoted buffers wholesale.

use crate::error::Result;
use crate::mempool::Pool;
use crate::slab::{BufferAllocator, RawBuffer};
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::Index;
use std::ptr;
use std::sync::Arc;

/// Growable vector with slab-backed storage
pub struct SlabVec<T, const STACK: usize> {
    alloc: BufferAllocator<T, STACK>,
    buf: RawBuffer<T>,
    len: usize,
}

impl<T, const STACK: usize> SlabVec<T, STACK> {
    /// Create an empty vector with its inline buffer wired in
    pub fn new(pool: Arc<Pool>) -> Self {
        let mut alloc = BufferAllocator::new(pool);
        let buf = alloc
            .allocate(STACK)
            .expect("inline buffer allocation cannot fail");
        Self { alloc, buf, len: 0 }
    }

    /// Create a vector holding `len` copies of `value`
    pub fn with_len(pool: Arc<Pool>, len: usize, value: T) -> Result<Self>
    where
        T: Clone,
    {
        let mut vec = Self::new(pool);
        vec.reserve(len.max(STACK))?;
        for _ in 0..len {
            vec.push(value.clone())?;
        }
        Ok(vec)
    }

    /// Pool this vector reports to
    pub fn pool(&self) -> &Arc<Pool> {
        self.alloc.pool()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current capacity; `STACK` until the vector outgrows its inline
    /// buffer
    pub fn capacity(&self) -> usize {
        self.alloc.capacity_of(&self.buf)
    }

    /// Whether the elements currently live in the inline buffer
    pub fn is_inline(&self) -> bool {
        self.buf.is_inline()
    }

    /// Ensure capacity for at least `capacity` elements
    ///
    /// Grows to exactly `capacity` in a single buffer allocation; no-op
    /// when the vector is already large enough.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity > self.capacity() {
            self.grow_to(capacity)?;
        }
        Ok(())
    }

    pub fn push(&mut self, value: T) -> Result<()> {
        if self.len == self.capacity() {
            let target = (self.capacity() * 2).max(self.capacity() + 1);
            self.grow_to(target)?;
        }
        let cells = self.alloc.cells_mut(&mut self.buf);
        cells[self.len].write(value);
        self.len += 1;
        self.alloc.pool().item_allocate(mem::size_of::<T>());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: cells[..old len] are initialized; the element at the
        // new len is moved out exactly once because len was decremented.
        let value = unsafe { self.alloc.cells(&self.buf)[self.len].assume_init_read() };
        self.alloc.pool().item_free(mem::size_of::<T>());
        Some(value)
    }

    /// Drop elements past `len`
    pub fn truncate(&mut self, len: usize) {
        while self.len > len {
            self.pop();
        }
    }

    /// Drop every element; capacity is retained
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn as_slice(&self) -> &[T] {
        let cells = self.alloc.cells(&self.buf);
        // SAFETY: cells[..len] are initialized
        unsafe { std::slice::from_raw_parts(cells.as_ptr() as *const T, self.len) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Exchange contents with `other`
    ///
    /// Both vectors are first promoted off their inline buffers (inline
    /// cells cannot change owners); the promoted state then swaps in one
    /// move. Worst case O(2·STACK) element moves from the promotions.
    pub fn swap(&mut self, other: &mut Self) -> Result<()> {
        self.reserve(STACK + 1)?;
        other.reserve(STACK + 1)?;
        mem::swap(self, other);
        Ok(())
    }

    /// Move to a heap buffer of exactly `target` elements
    fn grow_to(&mut self, target: usize) -> Result<()> {
        debug_assert!(target > self.capacity());
        let size = mem::size_of::<T>();
        let mut new_buf = self.alloc.allocate(target)?;
        let dst: *mut MaybeUninit<T> = match &mut new_buf {
            RawBuffer::Heap(storage) => storage.as_mut_ptr(),
            RawBuffer::Inline => unreachable!("growth target fits the inline buffer"),
        };

        // SAFETY: source and destination are valid for len elements and
        // cannot overlap; the old cells are treated as uninitialized from
        // here on, so each element is owned by exactly one buffer.
        unsafe {
            ptr::copy_nonoverlapping(self.alloc.cells(&self.buf).as_ptr(), dst, self.len);
        }

        // Report the move as construct-into-new, destroy-in-old so each
        // buffer's free/inuse attribution stays exact
        let pool = self.alloc.pool().clone();
        for _ in 0..self.len {
            pool.item_allocate(size);
        }
        for _ in 0..self.len {
            pool.item_free(size);
        }

        let old = mem::replace(&mut self.buf, new_buf);
        self.alloc.deallocate(old);
        Ok(())
    }
}

impl<T: Clone, const STACK: usize> SlabVec<T, STACK> {
    /// Copy every element into a fresh vector on the same pool
    pub fn try_clone(&self) -> Result<Self> {
        let mut clone = Self::new(self.pool().clone());
        clone.reserve(self.len.max(STACK))?;
        for value in self.iter() {
            clone.push(value.clone())?;
        }
        Ok(clone)
    }
}

impl<T: Clone, const STACK: usize> Clone for SlabVec<T, STACK> {
    fn clone(&self) -> Self {
        self.try_clone()
            .expect("pool limit exceeded while cloning vector")
    }

    /// Assignment reserves room for the source, then clears and appends
    fn clone_from(&mut self, source: &Self) {
        self.reserve(source.len().max(STACK))
            .expect("pool limit exceeded while cloning vector");
        self.clear();
        for value in source.iter() {
            self.push(value.clone())
                .expect("pool limit exceeded while cloning vector");
        }
    }
}

impl<T, const STACK: usize> Index<usize> for SlabVec<T, STACK> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T, const STACK: usize> Drop for SlabVec<T, STACK> {
    fn drop(&mut self) {
        self.clear();
        let old = mem::replace(&mut self.buf, RawBuffer::Inline);
        self.alloc.deallocate(old);
    }
}

impl<T: fmt::Debug, const STACK: usize> fmt::Debug for SlabVec<T, STACK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
