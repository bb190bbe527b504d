//! Caching allocator that recycles freed blocks.

use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;

use crate::buffer::{Allocation, BufferAllocator, SystemAllocator};
use crate::error::Result;

/// Byte-block allocator that never returns storage to its base allocator
/// while alive.
///
/// `allocate` hands out the smallest cached free block that fits before
/// asking the base allocator for a new one; `deallocate` moves the block
/// back to the free side, keeping its original capacity for reuse. Every
/// block ever produced is in exactly one of the two sides until the
/// allocator is dropped, at which point all cached storage is released.
///
/// Not thread-safe. Share within a thread as `Rc<RefCell<..>>`, which
/// itself implements [`BufferAllocator`].
pub struct PersistentAllocator<A: BufferAllocator = SystemAllocator> {
    base: A,
    free: BTreeMap<usize, Vec<NonNull<u8>>>,
    used: HashMap<NonNull<u8>, usize>,
}

impl PersistentAllocator<SystemAllocator> {
    pub fn new() -> Self {
        Self::with_base(SystemAllocator)
    }
}

impl Default for PersistentAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: BufferAllocator> PersistentAllocator<A> {
    pub fn with_base(base: A) -> Self {
        Self { base, free: BTreeMap::new(), used: HashMap::new() }
    }

    /// Number of cached blocks currently free.
    pub fn free_blocks(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Number of blocks currently handed out.
    pub fn used_blocks(&self) -> usize {
        self.used.len()
    }
}

impl<A: BufferAllocator> BufferAllocator for PersistentAllocator<A> {
    fn allocate(&mut self, n: usize) -> Result<Allocation> {
        // Smallest cached block with capacity >= n.
        if let Some(capacity) = self.free.range(n..).next().map(|(&c, _)| c) {
            let blocks = self.free.get_mut(&capacity).expect("free entry exists");
            let ptr = blocks.pop().expect("free entry is non-empty");
            if blocks.is_empty() {
                self.free.remove(&capacity);
            }
            self.used.insert(ptr, capacity);
            return Ok(Allocation { ptr, capacity });
        }
        let block = self.base.allocate(n)?;
        self.used.insert(block.ptr, block.capacity);
        Ok(block)
    }

    unsafe fn deallocate(&mut self, block: Allocation) {
        // Not our pointer: nothing we can responsibly do with it.
        let Some(capacity) = self.used.remove(&block.ptr) else {
            return;
        };
        self.free.entry(capacity).or_default().push(block.ptr);
    }
}

impl<A: BufferAllocator> Drop for PersistentAllocator<A> {
    fn drop(&mut self) {
        for (capacity, blocks) in std::mem::take(&mut self.free) {
            for ptr in blocks {
                // SAFETY: cached blocks came from `self.base`.
                unsafe { self.base.deallocate(Allocation { ptr, capacity }) };
            }
        }
        for (ptr, capacity) in std::mem::take(&mut self.used) {
            // SAFETY: as above; outstanding holders must be gone by now.
            unsafe { self.base.deallocate(Allocation { ptr, capacity }) };
        }
    }
}
