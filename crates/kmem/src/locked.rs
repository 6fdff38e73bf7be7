//! Spinlock-protected heap usable as the kernel's global allocator.
//!
//! ```rust,ignore
//! use kmem::LockedHeap;
//!
//! #[global_allocator]
//! static ALLOCATOR: LockedHeap = LockedHeap::empty();
//!
//! pub unsafe fn init(range: core::ops::Range<*mut u8>) {
//!     unsafe { ALLOCATOR.init(range.start, range.end) }.unwrap();
//! }
//! ```

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
    error::AllocError,
    heap::{ALIGNMENT, Heap},
    source::SegmentSource,
};

/// A [`Heap`] behind a spinlock.
///
/// The lock provides the single-mutator guarantee the heap relies on. It does
/// not mask interrupts; a handler that allocates while the interrupted code
/// holds the lock spins forever.
pub struct LockedHeap {
    heap: Mutex<Heap>,
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::empty()
    }
}

impl LockedHeap {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            heap: Mutex::new(Heap::empty()),
        }
    }

    /// Initializes the inner heap over `range_start..range_end`.
    ///
    /// # Errors
    ///
    /// See [`Heap::init`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::init`].
    #[track_caller]
    pub unsafe fn init(
        &self,
        range_start: *mut u8,
        range_end: *mut u8,
    ) -> Result<(), AllocError> {
        unsafe { self.heap.lock().init(range_start, range_end) }
    }

    /// Locks the heap for direct use.
    pub fn lock(&self) -> MutexGuard<'_, Heap> {
        self.heap.lock()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.heap
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            unsafe { self.heap.lock().release(ptr) }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        unsafe { self.heap.lock().resize(NonNull::new(ptr), new_size) }
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

impl SegmentSource for &LockedHeap {
    fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.heap.lock().allocate(size)
    }

    unsafe fn release_segment(&mut self, ptr: NonNull<u8>, _size: usize) {
        unsafe { self.heap.lock().release(ptr) }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use core::iter;

    use super::*;
    use crate::slab_pool::{PoolConfig, SlabPool};

    fn with_locked_heap<F>(heap_size: usize, test_fn: F)
    where
        F: FnOnce(&LockedHeap),
    {
        let layout = Layout::from_size_align(heap_size, 16).unwrap();
        unsafe {
            let memory = std::alloc::alloc(layout);
            let heap = LockedHeap::empty();
            heap.init(memory, memory.add(heap_size)).unwrap();
            test_fn(&heap);
            heap.lock().check_integrity().unwrap();
            std::alloc::dealloc(memory, layout);
        }
    }

    #[test]
    fn test_global_alloc_round_trip() {
        with_locked_heap(1024, |heap| unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let ptr = heap.alloc(layout);
            assert!(!ptr.is_null());
            ptr.write_bytes(0x42, 64);

            let grown = heap.realloc(ptr, layout, 256);
            assert!(!grown.is_null());
            for i in 0..64 {
                assert_eq!(grown.add(i).read(), 0x42);
            }
            heap.dealloc(grown, Layout::from_size_align(256, 8).unwrap());
        });
    }

    #[test]
    fn test_global_alloc_rejects_large_alignment() {
        with_locked_heap(1024, |heap| unsafe {
            let layout = Layout::from_size_align(64, 4 * ALIGNMENT).unwrap();
            assert!(heap.alloc(layout).is_null());
        });
    }

    #[test]
    fn test_global_alloc_out_of_memory() {
        with_locked_heap(256, |heap| unsafe {
            let layout = Layout::from_size_align(1024, 8).unwrap();
            assert!(heap.alloc(layout).is_null());
        });
    }

    #[test]
    fn test_uninitialized_heap_fails_allocation() {
        let heap = LockedHeap::empty();
        let layout = Layout::from_size_align(8, 8).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
    }

    #[test]
    fn test_pool_shares_locked_heap() {
        with_locked_heap(4096, |heap| {
            let mut pool =
                SlabPool::create_in(PoolConfig::new("shared", 32, 4).growth_delta(4), heap)
                    .unwrap();
            let slots: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
                .take(6)
                .collect();

            // the heap stays usable while the pool holds some of it
            let extra = heap.lock().allocate(100).unwrap();
            unsafe {
                heap.lock().release(extra);
            }

            for slot in slots {
                pool.release(slot).unwrap();
            }
            assert_eq!(pool.array_count(), 1);
        });
    }
}
