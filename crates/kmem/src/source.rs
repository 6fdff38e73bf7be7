//! Backing memory for slab pool arrays.

use alloc::alloc::{alloc, dealloc};
use core::{alloc::Layout, ptr::NonNull};

/// Alignment every [`SegmentSource`] guarantees for returned segments.
pub const SOURCE_ALIGN: usize = align_of::<usize>();

/// Supplier of raw byte segments.
///
/// Slab pools draw their array records, buffers, and bitmaps from a source.
/// Segments must be aligned to at least [`SOURCE_ALIGN`].
pub trait SegmentSource {
    /// Returns a segment of at least `size` bytes, or `None` if the source
    /// is exhausted.
    fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Gives a segment back to the source.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate_segment`] on this source
    /// with the same `size`, and must not be used afterwards.
    ///
    /// [`allocate_segment`]: Self::allocate_segment
    unsafe fn release_segment(&mut self, ptr: NonNull<u8>, size: usize);
}

impl<S> SegmentSource for &mut S
where
    S: SegmentSource + ?Sized,
{
    fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate_segment(size)
    }

    unsafe fn release_segment(&mut self, ptr: NonNull<u8>, size: usize) {
        unsafe { (**self).release_segment(ptr, size) }
    }
}

/// Segments from the global allocator of the `alloc` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

impl Global {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, SOURCE_ALIGN).ok()
    }
}

impl SegmentSource for Global {
    fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Self::layout(size)?;
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release_segment(&mut self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            unsafe { dealloc(ptr.as_ptr(), layout) }
        }
    }
}
