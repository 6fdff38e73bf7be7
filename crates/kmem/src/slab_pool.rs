//! Fixed-slot-size pool allocator.
//!
//! A [`SlabPool`] hands out slots of one size from a list of *arrays*. Each
//! array owns a buffer of `slot_count` slots, an occupancy bitmap with one
//! bit per slot, and a free-slot counter. The array created together with the
//! pool is the **original** array; it is kept for the lifetime of the pool.
//!
//! ```text
//! arrays (head = newest)
//! ┌────────────┐    ┌────────────┐    ┌──────────────────┐
//! │ grown #2   │ ─> │ grown #1   │ ─> │ original         │
//! │ bitmap     │    │ bitmap     │    │ bitmap           │
//! │ [slot|...] │    │ [slot|...] │    │ [slot|slot|...]  │
//! └────────────┘    └────────────┘    └──────────────────┘
//! ```
//!
//! - **Acquire**: arrays are scanned in the configured [`ScanOrder`]; the
//!   first array with a free slot provides its lowest clear bit. If every
//!   array is full and the growth delta is non-zero, a new array is
//!   prepended and serves the request from its slot 0.
//! - **Release**: the owning array is found by address range, the slot bit
//!   is cleared, and a grown array whose slots are all free again is
//!   returned to the [`SegmentSource`] immediately.
//!
//! Releasing a pointer the pool does not track as acquired is reported as
//! [`AllocError::ProtocolViolation`] and leaves the pool unchanged.

use core::{
    fmt,
    ptr::{self, NonNull},
    slice,
};

use intrusive_list::{Linked, Links, List};
#[cfg(feature = "log")]
use log::{debug, trace, warn};
use snafu::ensure;

use crate::{
    error::{
        AllocError, ErrorKind, InvalidArgumentSnafu, OutOfMemorySnafu, ProtocolViolationSnafu,
    },
    last_error,
    source::{Global, SOURCE_ALIGN, SegmentSource},
};

/// Order in which [`SlabPool::acquire`] visits arrays.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanOrder {
    /// Most recently grown array first. Keeps fresh allocations close to
    /// each other.
    #[default]
    NewestFirst,
    /// Original array first. Packs slots into old arrays so that grown
    /// arrays drain and get reclaimed sooner.
    OldestFirst,
}

/// Parameters of a [`SlabPool`].
///
/// ```
/// use kmem::{PoolConfig, ScanOrder};
///
/// let config = PoolConfig::new("task", 96, 32)
///     .align(64)
///     .growth_delta(16)
///     .scan_order(ScanOrder::OldestFirst);
/// assert_eq!(config.growth_delta, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Label used in logs and dumps.
    pub name: &'static str,
    /// Slot alignment; `0` selects the native word size.
    pub align: usize,
    /// Requested slot size; rounded up to a multiple of the alignment.
    pub slot_size: usize,
    /// Slots in the original array.
    pub initial_count: usize,
    /// Slots per grown array; `0` disables growth.
    pub growth_delta: usize,
    pub scan_order: ScanOrder,
}

impl PoolConfig {
    /// Creates a config with default alignment, no growth, and
    /// [`ScanOrder::NewestFirst`].
    #[must_use]
    pub const fn new(name: &'static str, slot_size: usize, initial_count: usize) -> Self {
        Self {
            name,
            align: 0,
            slot_size,
            initial_count,
            growth_delta: 0,
            scan_order: ScanOrder::NewestFirst,
        }
    }

    #[must_use]
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    #[must_use]
    pub const fn growth_delta(mut self, growth_delta: usize) -> Self {
        self.growth_delta = growth_delta;
        self
    }

    #[must_use]
    pub const fn scan_order(mut self, scan_order: ScanOrder) -> Self {
        self.scan_order = scan_order;
        self
    }
}

/// Occupancy summary of a [`SlabPool`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub arrays: usize,
    pub capacity: usize,
    pub free_slots: usize,
}

impl PoolStats {
    #[must_use]
    pub fn used_slots(&self) -> usize {
        self.capacity - self.free_slots
    }
}

/// One growth increment of a pool.
///
/// The record itself lives in a segment obtained from the pool's source.
struct Array {
    links: Links<Self>,
    raw: NonNull<u8>,
    raw_size: usize,
    bitmap: NonNull<usize>,
    bitmap_words: usize,
    /// First slot, aligned to the pool alignment.
    start: NonNull<u8>,
    slot_count: usize,
    free: usize,
    original: bool,
}

unsafe impl Linked for Array {
    fn links(this: NonNull<Self>) -> NonNull<Links<Self>> {
        unsafe { NonNull::new_unchecked(&raw mut (*this.as_ptr()).links) }
    }
}

impl Array {
    const RECORD_SIZE: usize = size_of::<Self>();

    /// Allocates the record, the buffer, and the bitmap, in that order.
    /// If any step fails, the earlier segments are given back.
    fn create<S>(
        source: &mut S,
        slot_size: usize,
        align: usize,
        slot_count: usize,
        original: bool,
    ) -> Option<NonNull<Self>>
    where
        S: SegmentSource,
    {
        const { assert!(align_of::<Self>() <= SOURCE_ALIGN) };

        let raw_size = slot_size
            .checked_mul(slot_count)?
            .checked_add(align.saturating_sub(SOURCE_ALIGN))?;
        let bitmap_words = bitmap::words_for(slot_count);
        let bitmap_size = bitmap_words * size_of::<usize>();

        let record = source.allocate_segment(Self::RECORD_SIZE)?.cast::<Self>();
        let Some(raw) = source.allocate_segment(raw_size) else {
            unsafe {
                source.release_segment(record.cast(), Self::RECORD_SIZE);
            }
            return None;
        };
        let Some(bitmap) = source.allocate_segment(bitmap_size) else {
            unsafe {
                source.release_segment(raw, raw_size);
                source.release_segment(record.cast(), Self::RECORD_SIZE);
            }
            return None;
        };

        let bitmap = bitmap.cast::<usize>();
        unsafe {
            ptr::write_bytes(bitmap.as_ptr(), 0, bitmap_words);
            let start = raw.add(raw.as_ptr().align_offset(align));
            record.write(Self {
                links: Links::new(),
                raw,
                raw_size,
                bitmap,
                bitmap_words,
                start,
                slot_count,
                free: slot_count,
                original,
            });
        }
        Some(record)
    }

    /// Gives the bitmap, the buffer, and the record back to `source`.
    ///
    /// # Safety
    ///
    /// `this` must have been created from `source` and be unlinked.
    unsafe fn destroy<S>(this: NonNull<Self>, source: &mut S)
    where
        S: SegmentSource,
    {
        unsafe {
            let array = this.as_ref();
            let (bitmap, bitmap_words) = (array.bitmap, array.bitmap_words);
            let (raw, raw_size) = (array.raw, array.raw_size);
            source.release_segment(bitmap.cast(), bitmap_words * size_of::<usize>());
            source.release_segment(raw, raw_size);
            source.release_segment(this.cast(), Self::RECORD_SIZE);
        }
    }

    fn bitmap(&self) -> &[usize] {
        unsafe { slice::from_raw_parts(self.bitmap.as_ptr(), self.bitmap_words) }
    }

    fn bitmap_mut(&mut self) -> &mut [usize] {
        unsafe { slice::from_raw_parts_mut(self.bitmap.as_ptr(), self.bitmap_words) }
    }

    fn start_addr(&self) -> usize {
        self.start.as_ptr().addr()
    }

    fn is_full(&self) -> bool {
        self.free == 0
    }

    fn is_unused(&self) -> bool {
        self.free == self.slot_count
    }

    /// Whether `addr` lies between the first and the last slot start.
    fn contains(&self, addr: usize, slot_size: usize) -> bool {
        let start = self.start_addr();
        addr >= start && addr <= start + slot_size * (self.slot_count - 1)
    }

    fn take_slot(&mut self, slot_size: usize) -> Option<NonNull<u8>> {
        if self.is_full() {
            return None;
        }
        let index = bitmap::first_clear(self.bitmap());
        if index >= self.slot_count {
            return None;
        }
        bitmap::set(self.bitmap_mut(), index);
        self.free -= 1;
        Some(unsafe { self.start.add(index * slot_size) })
    }
}

/// Pool of equally sized slots backed by a [`SegmentSource`].
///
/// Dropping the pool returns every array to the source. Slots still held by
/// callers become dangling; no per-slot cleanup runs.
pub struct SlabPool<S = Global>
where
    S: SegmentSource,
{
    name: &'static str,
    align: usize,
    slot_size: usize,
    growth_delta: usize,
    scan_order: ScanOrder,
    arrays: List<Array>,
    source: S,
}

unsafe impl<S> Send for SlabPool<S> where S: SegmentSource + Send {}

impl SlabPool<Global> {
    /// Creates a pool backed by the global allocator.
    ///
    /// `align == 0` selects the native word size.
    ///
    /// # Errors
    ///
    /// See [`create_in`](Self::create_in).
    #[track_caller]
    pub fn new(
        name: &'static str,
        align: usize,
        slot_size: usize,
        initial_count: usize,
        growth_delta: usize,
    ) -> Result<Self, AllocError> {
        Self::create(
            PoolConfig::new(name, slot_size, initial_count)
                .align(align)
                .growth_delta(growth_delta),
        )
    }

    /// Creates a pool from `config`, backed by the global allocator.
    ///
    /// # Errors
    ///
    /// See [`create_in`](Self::create_in).
    #[track_caller]
    pub fn create(config: PoolConfig) -> Result<Self, AllocError> {
        Self::create_in(config, Global)
    }
}

impl<S> SlabPool<S>
where
    S: SegmentSource,
{
    /// Creates a pool whose arrays are allocated from `source`.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if the slot size or the initial
    ///   count is zero, or the alignment is not a power of two.
    /// - [`AllocError::OutOfMemory`] if the original array cannot be
    ///   allocated. Nothing allocated so far is leaked.
    #[track_caller]
    pub fn create_in(config: PoolConfig, mut source: S) -> Result<Self, AllocError> {
        ensure!(
            config.slot_size > 0,
            InvalidArgumentSnafu {
                reason: "slot size must be non-zero",
            }
        );
        ensure!(
            config.initial_count > 0,
            InvalidArgumentSnafu {
                reason: "initial slot count must be non-zero",
            }
        );
        let align = match config.align {
            0 => size_of::<usize>(),
            align => align,
        };
        ensure!(
            align.is_power_of_two(),
            InvalidArgumentSnafu {
                reason: "alignment must be a power of two",
            }
        );
        let Some(slot_size) = config.slot_size.checked_next_multiple_of(align) else {
            return InvalidArgumentSnafu {
                reason: "slot size overflows when aligned",
            }
            .fail();
        };

        let Some(original) =
            Array::create(&mut source, slot_size, align, config.initial_count, true)
        else {
            warn!("slab pool `{}`: cannot allocate original array", config.name);
            last_error::record(ErrorKind::OutOfMemory);
            return OutOfMemorySnafu.fail();
        };

        let mut arrays = List::new();
        unsafe {
            arrays.push_front(original);
        }

        debug!(
            "slab pool `{}` created: {} slots of {slot_size} bytes, growth {}",
            config.name, config.initial_count, config.growth_delta
        );
        Ok(Self {
            name: config.name,
            align,
            slot_size,
            growth_delta: config.growth_delta,
            scan_order: config.scan_order,
            arrays,
            source,
        })
    }

    /// Name given at creation, used in log and dump output.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Slot alignment. A requested alignment of zero reads back as the word
    /// size.
    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Slot size after rounding up to the alignment.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slots in each array added on growth. Zero means the pool never grows.
    #[must_use]
    pub fn growth_delta(&self) -> usize {
        self.growth_delta
    }

    /// Order in which arrays are searched by [`acquire`](Self::acquire) and
    /// [`release`](Self::release).
    #[must_use]
    pub fn scan_order(&self) -> ScanOrder {
        self.scan_order
    }

    /// Number of arrays, including the original one.
    #[must_use]
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// Total number of slots across all arrays.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arrays.iter().map(|a| a.slot_count).sum()
    }

    /// Number of slots that can be acquired without growing.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.arrays.iter().map(|a| a.free).sum()
    }

    /// Snapshot of array and slot counts.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            arrays: self.array_count(),
            capacity: self.capacity(),
            free_slots: self.free_slots(),
        }
    }

    /// Returns a free slot, growing the pool if allowed.
    ///
    /// Returns `None` when every array is full and the pool either has no
    /// growth delta or its source cannot supply a new array. In that case
    /// [`ErrorKind::OutOfMemory`] is recorded as the
    /// [last error](crate::last_error).
    pub fn acquire(&mut self) -> Option<NonNull<u8>> {
        let slot_size = self.slot_size;
        if let Some(mut array) = self.find_array(|a| !a.is_full()) {
            if let Some(slot) = unsafe { array.as_mut() }.take_slot(slot_size) {
                trace!("slab pool `{}`: acquired {:#x}", self.name, slot.as_ptr().addr());
                return Some(slot);
            }
        }
        self.grow()
    }

    /// Returns `ptr` to the pool.
    ///
    /// If this frees the last used slot of a grown array, that array is
    /// handed back to the source. The original array is never reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ProtocolViolation`], without changing the pool,
    /// if `ptr` is not the start of a slot that is currently acquired. This
    /// covers double releases and pointers from elsewhere.
    #[track_caller]
    pub fn release(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr().addr();
        let slot_size = self.slot_size;

        let Some(mut array_ptr) = self.find_array(|a| a.contains(addr, slot_size)) else {
            warn!("slab pool `{}`: {addr:#x} is not in any array", self.name);
            return ProtocolViolationSnafu { addr }.fail();
        };

        let array = unsafe { array_ptr.as_mut() };
        let offset = addr - array.start_addr();
        if !offset.is_multiple_of(slot_size) {
            warn!("slab pool `{}`: {addr:#x} is not a slot boundary", self.name);
            return ProtocolViolationSnafu { addr }.fail();
        }
        let index = offset / slot_size;
        if !bitmap::is_set(array.bitmap(), index) {
            warn!("slab pool `{}`: {addr:#x} released twice", self.name);
            return ProtocolViolationSnafu { addr }.fail();
        }

        bitmap::clear(array.bitmap_mut(), index);
        array.free += 1;
        trace!("slab pool `{}`: released {addr:#x}", self.name);

        if array.is_unused() && !array.original {
            let slots = array.slot_count;
            unsafe {
                self.arrays.remove(array_ptr);
                Array::destroy(array_ptr, &mut self.source);
            }
            debug!(
                "slab pool `{}`: reclaimed array of {slots} slots, {} left",
                self.name,
                self.arrays.len()
            );
        }
        Ok(())
    }

    /// Releases every array. Equivalent to dropping the pool.
    pub fn destroy(self) {
        drop(self);
    }

    /// Writes a description of the pool and each of its arrays to `w`.
    ///
    /// The format is meant for humans and may change.
    pub fn dump<W>(&self, w: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        let stats = self.stats();
        writeln!(
            w,
            "slab pool `{}`: slot {} bytes, align {}, growth {}, {:?}, {}/{} slots used",
            self.name,
            self.slot_size,
            self.align,
            self.growth_delta,
            self.scan_order,
            stats.used_slots(),
            stats.capacity
        )?;
        for (i, array) in self.arrays.iter().enumerate() {
            let start = array.start_addr();
            writeln!(
                w,
                "  array {i}{}: {start:#x}..{:#x}, {} slots, {} free",
                if array.original { " (original)" } else { "" },
                start + self.slot_size * array.slot_count,
                array.slot_count,
                array.free
            )?;
            write!(w, "    bitmap:")?;
            for word in array.bitmap() {
                write!(w, " {word:0width$x}", width = bitmap::BITS_PER_WORD / 4)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    fn find_array<P>(&self, mut pred: P) -> Option<NonNull<Array>>
    where
        P: FnMut(&Array) -> bool,
    {
        let mut nodes = self.arrays.nodes();
        let mut matches = |node: &NonNull<Array>| pred(unsafe { node.as_ref() });
        match self.scan_order {
            ScanOrder::NewestFirst => nodes.find(&mut matches),
            ScanOrder::OldestFirst => nodes.rfind(&mut matches),
        }
    }

    fn grow(&mut self) -> Option<NonNull<u8>> {
        if self.growth_delta == 0 {
            warn!("slab pool `{}`: exhausted and not growable", self.name);
            last_error::record(ErrorKind::OutOfMemory);
            return None;
        }

        let Some(mut array) = Array::create(
            &mut self.source,
            self.slot_size,
            self.align,
            self.growth_delta,
            false,
        ) else {
            warn!("slab pool `{}`: cannot allocate a new array", self.name);
            last_error::record(ErrorKind::OutOfMemory);
            return None;
        };

        unsafe {
            self.arrays.push_front(array);
        }
        debug!(
            "slab pool `{}`: grew by {} slots to {} arrays",
            self.name,
            self.growth_delta,
            self.arrays.len()
        );
        unsafe { array.as_mut() }.take_slot(self.slot_size)
    }
}

impl<S> Drop for SlabPool<S>
where
    S: SegmentSource,
{
    fn drop(&mut self) {
        while let Some(array) = self.arrays.head() {
            unsafe {
                self.arrays.remove(array);
                Array::destroy(array, &mut self.source);
            }
        }
        debug!("slab pool `{}` destroyed", self.name);
    }
}

impl<S> fmt::Debug for SlabPool<S>
where
    S: SegmentSource,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("name", &self.name)
            .field("align", &self.align)
            .field("slot_size", &self.slot_size)
            .field("growth_delta", &self.growth_delta)
            .field("scan_order", &self.scan_order)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::{string::String, vec::Vec};
    use core::{alloc::Layout, iter};

    use super::*;
    use crate::Heap;

    const WORD: usize = size_of::<usize>();

    /// Wraps [`Global`], counting live segments and failing on request.
    #[derive(Default)]
    struct TestSource {
        calls: usize,
        fail_at: Option<usize>,
        fail_after: Option<usize>,
        live: usize,
    }

    impl SegmentSource for TestSource {
        fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_at == Some(call) || self.fail_after.is_some_and(|n| call >= n) {
                return None;
            }
            let ptr = Global.allocate_segment(size)?;
            self.live += 1;
            Some(ptr)
        }

        unsafe fn release_segment(&mut self, ptr: NonNull<u8>, size: usize) {
            self.live -= 1;
            unsafe { Global.release_segment(ptr, size) }
        }
    }

    fn fill_slot(ptr: NonNull<u8>, len: usize, byte: u8) {
        unsafe {
            ptr.as_ptr().write_bytes(byte, len);
        }
    }

    fn verify_slot(ptr: NonNull<u8>, len: usize, byte: u8) {
        for i in 0..len {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, byte);
        }
    }

    #[test]
    fn test_create_rejects_zero_sizes() {
        let err = SlabPool::new("zero-slot", 0, 0, 4, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = SlabPool::new("zero-count", 0, 16, 0, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = SlabPool::new("odd-align", 3, 16, 4, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_rounds_slot_size() {
        let pool = SlabPool::new("rounded", 0, 50, 10, 10).unwrap();
        assert_eq!(pool.align(), WORD);
        assert_eq!(pool.slot_size(), 50_usize.next_multiple_of(WORD));
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.free_slots(), 10);
        assert_eq!(pool.array_count(), 1);

        let pool = SlabPool::new("aligned", 32, 50, 1, 0).unwrap();
        assert_eq!(pool.slot_size(), 64);
    }

    #[test]
    fn test_create_rolls_back_on_failure() {
        for fail_at in 0..3 {
            let mut source = TestSource {
                fail_at: Some(fail_at),
                ..TestSource::default()
            };
            let err = SlabPool::create_in(PoolConfig::new("rollback", 32, 8), &mut source)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfMemory);
            assert_eq!(source.calls, fail_at + 1);
            assert_eq!(source.live, 0);
        }
        assert_eq!(last_error::last_error(), Some(ErrorKind::OutOfMemory));
    }

    #[test]
    fn test_acquire_with_capacity_never_fails() {
        let mut pool = SlabPool::new("fixed", 0, 24, 16, 0).unwrap();
        let mut slots = Vec::new();
        for _ in 0..16 {
            assert!(pool.free_slots() > 0);
            slots.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.free_slots(), 0);

        let mut sorted = slots.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 16);
    }

    #[test]
    fn test_slot_offsets_are_slot_multiples() {
        let mut pool = SlabPool::create(PoolConfig::new("offsets", 40, 8).align(16)).unwrap();
        let slots: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
            .take(8)
            .collect();
        let base = slots[0].as_ptr().addr();
        for (i, slot) in slots.iter().enumerate() {
            let addr = slot.as_ptr().addr();
            assert_eq!(addr % 16, 0);
            assert_eq!(addr - base, i * pool.slot_size());
        }
    }

    #[test]
    fn test_large_alignment() {
        let mut pool = SlabPool::new("cacheline", 64, 24, 4, 4).unwrap();
        assert_eq!(pool.slot_size(), 64);
        for _ in 0..12 {
            let slot = pool.acquire().unwrap();
            assert_eq!(slot.as_ptr().addr() % 64, 0);
        }
        assert_eq!(pool.array_count(), 3);
    }

    #[test]
    fn test_acquire_release_round_trip() {
        let mut pool = SlabPool::new("round-trip", 0, 32, 4, 0).unwrap();
        let _held = pool.acquire().unwrap();
        let before = pool.free_slots();

        let slot = pool.acquire().unwrap();
        assert_eq!(pool.free_slots(), before - 1);
        pool.release(slot).unwrap();
        assert_eq!(pool.free_slots(), before);

        // the lowest clear bit is handed out again
        assert_eq!(pool.acquire(), Some(slot));
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let mut pool = SlabPool::new("overlap", 0, 48, 8, 8).unwrap();
        let slots: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
            .take(20)
            .collect();
        for (i, &slot) in slots.iter().enumerate() {
            fill_slot(slot, 48, u8::try_from(i).unwrap());
        }
        for (i, &slot) in slots.iter().enumerate() {
            verify_slot(slot, 48, u8::try_from(i).unwrap());
        }
        for slot in slots {
            pool.release(slot).unwrap();
        }
    }

    #[test]
    fn test_pool_without_growth_exhausts() {
        let mut pool = SlabPool::new("no-growth", 0, 16, 3, 0).unwrap();
        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.array_count(), 1);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(last_error::last_error(), Some(ErrorKind::OutOfMemory));
    }

    #[test]
    fn test_growth_on_eleventh_acquire() {
        let mut pool = SlabPool::new("grow", 0, 50, 10, 10).unwrap();
        for _ in 0..10 {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.array_count(), 1);

        let slot = pool.acquire().unwrap();
        assert_eq!(pool.capacity(), 20);
        assert_eq!(pool.array_count(), 2);
        assert_eq!(pool.free_slots(), 9);

        // served from slot 0 of the new head array
        let head = pool.arrays.head().unwrap();
        assert_eq!(slot, unsafe { head.as_ref() }.start);
    }

    #[test]
    fn test_grown_array_is_reclaimed_when_empty() {
        let mut source = TestSource::default();
        let mut pool = SlabPool::create_in(
            PoolConfig::new("reclaim", 32, 2).growth_delta(2),
            &mut source,
        )
        .unwrap();

        let original: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
            .take(2)
            .collect();
        let grown: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
            .take(2)
            .collect();
        assert_eq!(pool.array_count(), 2);

        pool.release(grown[0]).unwrap();
        assert_eq!(pool.array_count(), 2);
        pool.release(grown[1]).unwrap();
        assert_eq!(pool.array_count(), 1);
        assert_eq!(pool.capacity(), 2);

        // the original array survives being completely free
        for slot in original {
            pool.release(slot).unwrap();
        }
        assert_eq!(pool.array_count(), 1);
        assert_eq!(pool.free_slots(), 2);

        drop(pool);
        assert_eq!(source.live, 0);
    }

    #[test]
    fn test_growth_failure_returns_none() {
        let mut source = TestSource {
            fail_after: Some(3),
            ..TestSource::default()
        };
        let mut pool =
            SlabPool::create_in(PoolConfig::new("starved", 16, 1).growth_delta(4), &mut source)
                .unwrap();
        pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.array_count(), 1);
        assert_eq!(last_error::last_error(), Some(ErrorKind::OutOfMemory));
        drop(pool);
        assert_eq!(source.live, 0);
    }

    #[test]
    fn test_double_release_is_reported() {
        let mut pool = SlabPool::new("double", 0, 16, 4, 0).unwrap();
        let slot = pool.acquire().unwrap();
        pool.release(slot).unwrap();
        let free = pool.free_slots();

        let err = pool.release(slot).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(pool.free_slots(), free);
    }

    #[test]
    fn test_foreign_and_interior_pointers_are_reported() {
        let mut pool = SlabPool::new("foreign", 0, 32, 4, 0).unwrap();
        let slot = pool.acquire().unwrap();
        let stats = pool.stats();

        let mut outside = 0_u64;
        let err = pool.release(NonNull::from(&mut outside).cast()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        let interior = unsafe { slot.add(8) };
        let err = pool.release(interior).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        // one past the last slot start is outside the array
        let past = unsafe { slot.add(4 * pool.slot_size()) };
        let err = pool.release(past).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        assert_eq!(pool.stats(), stats);
        pool.release(slot).unwrap();
    }

    #[test]
    fn test_newest_first_prefers_grown_array() {
        let mut pool = SlabPool::create(
            PoolConfig::new("newest", 16, 2)
                .growth_delta(2)
                .scan_order(ScanOrder::NewestFirst),
        )
        .unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();

        pool.release(a).unwrap();
        let next = pool.acquire().unwrap();
        assert_eq!(next.as_ptr().addr(), c.as_ptr().addr() + pool.slot_size());
    }

    #[test]
    fn test_oldest_first_prefers_original_array() {
        let mut pool = SlabPool::create(
            PoolConfig::new("oldest", 16, 2)
                .growth_delta(2)
                .scan_order(ScanOrder::OldestFirst),
        )
        .unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let _c = pool.acquire().unwrap();

        pool.release(a).unwrap();
        assert_eq!(pool.acquire(), Some(a));
    }

    #[test]
    fn test_bitmap_spanning_multiple_words() {
        let count = bitmap::BITS_PER_WORD + 3;
        let mut pool = SlabPool::new("wide", 0, 8, count, 0).unwrap();
        let slots: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
            .take(count)
            .collect();
        assert!(pool.acquire().is_none());

        let last = *slots.last().unwrap();
        pool.release(last).unwrap();
        assert_eq!(pool.acquire(), Some(last));
    }

    #[test]
    fn test_pool_backed_by_heap() {
        let layout = Layout::from_size_align(4096, 16).unwrap();
        unsafe {
            let memory = std::alloc::alloc(layout);
            let mut heap = Heap::new(memory, memory.add(4096)).unwrap();
            let free = heap.stats().free_bytes;
            {
                let mut pool = SlabPool::create_in(
                    PoolConfig::new("on-heap", 64, 4).growth_delta(4),
                    &mut heap,
                )
                .unwrap();
                let slots: Vec<_> = iter::repeat_with(|| pool.acquire().unwrap())
                    .take(8)
                    .collect();
                assert_eq!(pool.array_count(), 2);
                for slot in slots {
                    pool.release(slot).unwrap();
                }
                assert_eq!(pool.array_count(), 1);
            }
            // every record, buffer, and bitmap went back to the heap
            heap.coalesce();
            assert_eq!(heap.stats().free_bytes, free);
            assert_eq!(heap.blocks().count(), 2);
            heap.check_integrity().unwrap();
            std::alloc::dealloc(memory, layout);
        }
    }

    #[test]
    fn test_dump() {
        let mut pool = SlabPool::new("dumped", 0, 16, 2, 2).unwrap();
        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        let mut out = String::new();
        pool.dump(&mut out).unwrap();
        assert!(out.starts_with("slab pool `dumped`"));
        assert!(out.contains("3/4 slots used"));
        assert_eq!(out.matches("(original)").count(), 1);
        assert_eq!(out.matches("bitmap:").count(), 2);
    }

    #[test]
    fn test_destroy_returns_every_segment() {
        let mut source = TestSource::default();
        let mut pool =
            SlabPool::create_in(PoolConfig::new("destroy", 8, 1).growth_delta(1), &mut source)
                .unwrap();
        for _ in 0..5 {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.array_count(), 5);
        pool.destroy();
        assert_eq!(source.live, 0);
    }
}
