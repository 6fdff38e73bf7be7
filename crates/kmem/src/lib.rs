//! Dynamic memory subsystem for a small preemptible kernel.
//!
//! The crate provides two independent allocators that kernel code can use
//! side by side. Both are `no_std` and work over memory handed to them by the
//! caller.
//!
//! # Available Allocators
//!
//! ## [`SlabPool`](slab_pool::SlabPool)
//!
//! A fixed-slot-size pool made of one or more *arrays*. Each array is a
//! buffer of equally sized slots tracked by its own occupancy bitmap. The
//! pool grows by adding arrays on demand and shrinks by reclaiming grown
//! arrays as soon as all of their slots are free. Best suited for:
//!
//! - Objects of a single size that are allocated and released often
//! - Paths where allocation must be a short bitmap scan
//!
//! ## [`Heap`](heap::Heap)
//!
//! A general-purpose first-fit allocator over one contiguous address range.
//! The range is organized as an address-ordered chain of block headers
//! ending in a permanent sentinel. Free blocks are merged lazily, only when
//! an allocation cannot be satisfied otherwise. Best suited for:
//!
//! - Variable-sized, less frequent allocations
//! - Backing memory for slab pools (see [`SegmentSource`])
//!
//! # Usage Examples
//!
//! ```rust
//! use kmem::{Heap, SlabPool};
//!
//! // In a kernel this would be a linker-provided region.
//! let mut memory = vec![0_usize; 512];
//! let range = memory.as_mut_ptr_range();
//! let mut heap = unsafe { Heap::new(range.start.cast(), range.end.cast()) }.unwrap();
//!
//! let block = heap.allocate(100).unwrap();
//! let block = unsafe { heap.resize(Some(block), 200) }.unwrap();
//! unsafe {
//!     heap.release(block);
//! }
//!
//! let mut pool = SlabPool::new("inode", 0, 48, 16, 16).unwrap();
//! let slot = pool.acquire().unwrap();
//! pool.release(slot).unwrap();
//! ```
//!
//! # Concurrency
//!
//! Neither allocator locks internally. Every method takes `&mut self`, so a
//! single mutator per instance is enforced by the borrow checker within one
//! context. Sharing an instance across contexts (for example with interrupt
//! handlers) requires a caller-side lock such as [`LockedHeap`].
//!
//! # Release Policies
//!
//! | Allocator | Releasing a pointer that is not live |
//! |-----------|--------------------------------------|
//! | `SlabPool` | Returns [`AllocError::ProtocolViolation`], pool untouched |
//! | `Heap` | Panics: the block chain can no longer be trusted |

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

// Stub macros when log is disabled. Arguments are still type-checked.
#[cfg(not(feature = "log"))]
#[expect(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
#[expect(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

pub mod error;
pub mod heap;
pub mod last_error;
pub mod locked;
pub mod slab_pool;
pub mod source;

pub use self::{
    error::{AllocError, ErrorKind, Location},
    heap::{ALIGNMENT, BlockTag, HEADER_SIZE, Heap, HeapStats},
    last_error::last_error,
    locked::LockedHeap,
    slab_pool::{PoolConfig, PoolStats, ScanOrder, SlabPool},
    source::{Global, SOURCE_ALIGN, SegmentSource},
};
