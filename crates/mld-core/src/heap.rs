//! Tracked heap
//!
//! Backs the allocation hook: hands out zero-filled blocks and owns them
//! until they are freed or the heap is dropped. The heap does no reachability
//! bookkeeping of its own.

use crate::{MldError, MldResult};
use rustc_hash::FxHashMap;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment of every block, enough for any field kind the registry models
pub const BLOCK_ALIGN: usize = 16;

/// Heap allocator for tracked allocations
#[derive(Debug, Default)]
pub struct TrackedHeap {
    /// Live blocks keyed by address
    blocks: FxHashMap<usize, Layout>,

    /// Total bytes allocated
    allocated_bytes: usize,

    /// Maximum heap size (0 = unlimited)
    max_heap_bytes: usize,
}

impl TrackedHeap {
    /// Create a heap with a size cap (0 = unlimited)
    pub fn new(max_heap_bytes: usize) -> Self {
        Self {
            blocks: FxHashMap::default(),
            allocated_bytes: 0,
            max_heap_bytes,
        }
    }

    /// Set maximum heap size
    pub fn set_max_heap_size(&mut self, bytes: usize) {
        self.max_heap_bytes = bytes;
    }

    /// Allocate `size` zeroed bytes
    pub fn allocate_zeroed(&mut self, size: usize) -> MldResult<NonNull<u8>> {
        if self.max_heap_bytes > 0
            && self
                .allocated_bytes
                .checked_add(size)
                .map_or(true, |total| total > self.max_heap_bytes)
        {
            return Err(MldError::HeapLimitExceeded {
                requested: size,
                allocated: self.allocated_bytes,
                limit: self.max_heap_bytes,
            });
        }

        let layout = Layout::from_size_align(size.max(1), BLOCK_ALIGN)
            .map_err(|_| MldError::AllocationFailed { size })?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(MldError::AllocationFailed { size })?;

        self.blocks.insert(ptr.as_ptr() as usize, layout);
        self.allocated_bytes += layout.size();
        Ok(ptr)
    }

    /// Release a block previously returned by [`TrackedHeap::allocate_zeroed`]
    pub fn free(&mut self, address: usize) -> MldResult<()> {
        let layout = self
            .blocks
            .remove(&address)
            .ok_or(MldError::UnknownObject { address })?;
        self.allocated_bytes -= layout.size();

        // SAFETY: the block was allocated by this heap with this layout and
        // has just been removed from the live set.
        unsafe { dealloc(address as *mut u8, layout) };
        Ok(())
    }

    /// Check if `address` is the start of a live block
    pub fn owns(&self, address: usize) -> bool {
        self.blocks.contains_key(&address)
    }

    /// Get total allocated bytes
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Get number of live blocks
    pub fn allocation_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Drop for TrackedHeap {
    fn drop(&mut self) {
        for (address, layout) in self.blocks.drain() {
            // SAFETY: every entry is a live block allocated with its layout.
            unsafe { dealloc(address as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_creation() {
        let heap = TrackedHeap::default();
        assert_eq!(heap.allocated_bytes(), 0);
        assert_eq!(heap.allocation_count(), 0);
    }

    #[test]
    fn test_allocate_zeroed() {
        let mut heap = TrackedHeap::default();
        let ptr = heap.allocate_zeroed(64).unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(ptr.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(heap.allocation_count(), 1);
        assert_eq!(heap.allocated_bytes(), 64);
        assert!(heap.owns(ptr.as_ptr() as usize));
    }

    #[test]
    fn test_free() {
        let mut heap = TrackedHeap::default();
        let ptr = heap.allocate_zeroed(32).unwrap();
        let address = ptr.as_ptr() as usize;

        heap.free(address).unwrap();
        assert_eq!(heap.allocation_count(), 0);
        assert_eq!(heap.allocated_bytes(), 0);
        assert_eq!(
            heap.free(address).unwrap_err(),
            MldError::UnknownObject { address }
        );
    }

    #[test]
    fn test_heap_max_size() {
        let mut heap = TrackedHeap::new(100);
        heap.allocate_zeroed(60).unwrap();

        let err = heap.allocate_zeroed(60).unwrap_err();
        assert_eq!(
            err,
            MldError::HeapLimitExceeded {
                requested: 60,
                allocated: 60,
                limit: 100
            }
        );
        assert_eq!(heap.allocation_count(), 1);

        heap.set_max_heap_size(0);
        heap.allocate_zeroed(60).unwrap();
    }

    #[test]
    fn test_drop_releases_blocks() {
        let mut heap = TrackedHeap::default();
        for size in [8, 16, 1024] {
            heap.allocate_zeroed(size).unwrap();
        }
        drop(heap);
    }
}
