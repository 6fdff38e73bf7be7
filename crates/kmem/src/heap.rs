//! General-purpose heap over one contiguous address range.
//!
//! # Algorithm
//!
//! The range is carved into blocks, each preceded by a [`BlockHeader`].
//! Headers form a singly-linked chain in ascending address order; the chain
//! ends in a **sentinel** header at the very end of the range whose link
//! points to itself.
//!
//! - **Allocation**: first-fit scan from the start of the range. A fitting
//!   free block is split when the remainder can hold another header,
//!   otherwise it is consumed whole.
//! - **Release**: the block is tagged free again. Nothing is merged here.
//! - **Coalescing**: when a scan finds no fitting block, every run of
//!   adjacent free blocks is merged into one and the scan is retried once.
//!
//! # Memory Layout
//!
//! ```text
//! range_start                                                    range_end
//! │                                                                      │
//! ┌────────┬───────────┬────────┬───────────────┬─   ─┬────────────────┐
//! │ header │ payload   │ header │ payload       │ ... │ sentinel header│
//! │ (next, │           │ (next, │               │     │ (next = self)  │
//! │  tag)  │           │  tag)  │               │     │                │
//! └────────┴───────────┴────────┴───────────────┴─   ─┴────────────────┘
//! ```
//!
//! A block's available size is the distance to the next header minus one
//! header. Header bytes are counted as allocated in [`HeapStats`].

use core::{
    fmt,
    ptr::{self, NonNull},
};

#[cfg(feature = "log")]
use log::{debug, trace, warn};
use snafu::{Snafu, ensure};

use crate::{
    error::{AllocError, ErrorKind, InvalidArgumentSnafu},
    last_error,
    source::SegmentSource,
};

/// Granularity of every allocation size, in bytes.
pub const ALIGNMENT: usize = size_of::<usize>();

/// Size of one block header, in bytes.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(align_of::<BlockHeader>() == ALIGNMENT);
const _: () = assert!(HEADER_SIZE.is_multiple_of(ALIGNMENT));

/// State of a heap block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BlockTag {
    Allocated = 0x4b4d_a110,
    Free = 0x4b4d_f7ee,
    Sentinel = 0x4b4d_e11d,
}

impl BlockTag {
    const fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0x4b4d_a110 => Some(Self::Allocated),
            0x4b4d_f7ee => Some(Self::Free),
            0x4b4d_e11d => Some(Self::Sentinel),
            _ => None,
        }
    }
}

#[repr(C)]
struct BlockHeader {
    next: *mut Self,
    /// Raw [`BlockTag`]; decoded by [`BlockHeader::tag`].
    tag: usize,
}

impl BlockHeader {
    /// Decodes the tag word, panicking if it holds no known tag.
    ///
    /// # Safety
    ///
    /// `block` must point to a header inside an initialized heap.
    unsafe fn tag(block: *mut Self) -> BlockTag {
        let raw = unsafe { (*block).tag };
        let Some(tag) = BlockTag::from_raw(raw) else {
            panic!(
                "corrupted heap block header at {:#x}: tag {raw:#x}",
                block.addr()
            );
        };
        tag
    }

    /// # Safety
    ///
    /// `block` must point to a header inside an initialized heap.
    unsafe fn set_tag(block: *mut Self, tag: BlockTag) {
        unsafe { (*block).tag = tag as usize }
    }

    /// Following header in address order. The sentinel links to itself.
    ///
    /// # Safety
    ///
    /// `block` must point to a header inside an initialized heap.
    unsafe fn next(block: *mut Self) -> *mut Self {
        unsafe { (*block).next }
    }

    /// Bytes between the end of this header and the next header.
    ///
    /// # Safety
    ///
    /// `block` must not be the sentinel.
    unsafe fn available(block: *mut Self) -> usize {
        unsafe { (*block).next.addr() - block.addr() - HEADER_SIZE }
    }

    /// First byte handed out to the caller, right after the header.
    ///
    /// # Safety
    ///
    /// `block` must point to a header inside an initialized heap.
    unsafe fn payload(block: *mut Self) -> *mut u8 {
        unsafe { block.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Inverse of [`BlockHeader::payload`].
    ///
    /// # Safety
    ///
    /// `ptr` must be at least [`HEADER_SIZE`] bytes past the heap start and
    /// pointer aligned.
    #[expect(clippy::cast_ptr_alignment)]
    unsafe fn from_payload(ptr: *mut u8) -> *mut Self {
        unsafe { ptr.sub(HEADER_SIZE).cast::<Self>() }
    }
}

/// Byte accounting of a [`Heap`], maintained incrementally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Sum of the available sizes of all free blocks.
    pub free_bytes: usize,
    /// Everything else: headers plus live payloads.
    pub allocated_bytes: usize,
}

/// One entry of [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub header: usize,
    /// Available size; zero for the sentinel.
    pub size: usize,
    pub tag: BlockTag,
}

impl BlockInfo {
    /// Address of the first payload byte.
    #[must_use]
    pub fn payload(&self) -> usize {
        self.header + HEADER_SIZE
    }
}

/// Inconsistency found by [`Heap::check_integrity`].
#[derive(Debug, Snafu)]
pub enum IntegrityError {
    #[snafu(display("heap is not initialized"))]
    Uninitialized,
    #[snafu(display("block at {addr:#x} links backwards or past the sentinel"))]
    BrokenLink { addr: usize },
    #[snafu(display("sentinel at {addr:#x} is not the last header of the range"))]
    MisplacedSentinel { addr: usize },
    #[snafu(display("free bytes recorded as {recorded} but blocks hold {counted}"))]
    FreeBytesMismatch { recorded: usize, counted: usize },
    #[snafu(display("recorded byte counters do not add up to the range size {total}"))]
    TotalMismatch { total: usize },
}

/// First-fit heap with lazy coalescing.
///
/// The heap owns its address range exclusively once initialized. It has no
/// internal locking; see [`LockedHeap`](crate::LockedHeap) for a shared
/// wrapper.
pub struct Heap {
    start: *mut BlockHeader,
    end: usize,
    stats: HeapStats,
}

unsafe impl Send for Heap {}

impl Default for Heap {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("start", &self.start)
            .field("end", &format_args!("{:#x}", self.end))
            .field("stats", &self.stats)
            .finish()
    }
}

impl Heap {
    /// Creates a heap with no memory. Every allocation fails until
    /// [`init`](Self::init) is called.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            start: ptr::null_mut(),
            end: 0,
            stats: HeapStats {
                free_bytes: 0,
                allocated_bytes: 0,
            },
        }
    }

    /// Creates a heap managing `range_start..range_end`.
    ///
    /// # Safety
    ///
    /// Same contract as [`init`](Self::init).
    pub unsafe fn new(range_start: *mut u8, range_end: *mut u8) -> Result<Self, AllocError> {
        let mut heap = Self::empty();
        unsafe {
            heap.init(range_start, range_end)?;
        }
        Ok(heap)
    }

    /// Takes ownership of `range_start..range_end` and installs the two
    /// permanent headers: a free block spanning the range and the sentinel.
    ///
    /// Any previous state of this heap is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the start lies after the end,
    /// if the range length is not a multiple of [`HEADER_SIZE`], if the start is
    /// not header-aligned, or if the range cannot hold two headers.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `range_start..range_end` is valid for reads and writes and derived
    ///   from one allocation
    /// - The memory is not used by anything else while the heap lives
    #[track_caller]
    pub unsafe fn init(
        &mut self,
        range_start: *mut u8,
        range_end: *mut u8,
    ) -> Result<(), AllocError> {
        let start = range_start.addr();
        let end = range_end.addr();
        ensure!(
            start <= end,
            InvalidArgumentSnafu {
                reason: "heap range starts after it ends",
            }
        );
        let total = end - start;
        ensure!(
            total.is_multiple_of(HEADER_SIZE),
            InvalidArgumentSnafu {
                reason: "heap range bounds are not congruent modulo the header size",
            }
        );
        ensure!(
            start.is_multiple_of(align_of::<BlockHeader>()),
            InvalidArgumentSnafu {
                reason: "heap range start is not header-aligned",
            }
        );
        ensure!(
            total >= 2 * HEADER_SIZE,
            InvalidArgumentSnafu {
                reason: "heap range cannot hold the permanent headers",
            }
        );

        #[expect(clippy::cast_ptr_alignment)]
        let first = range_start.cast::<BlockHeader>();
        #[expect(clippy::cast_ptr_alignment)]
        let sentinel = unsafe { range_start.add(total - HEADER_SIZE) }.cast::<BlockHeader>();
        unsafe {
            sentinel.write(BlockHeader {
                next: sentinel,
                tag: BlockTag::Sentinel as usize,
            });
            first.write(BlockHeader {
                next: sentinel,
                tag: BlockTag::Free as usize,
            });
        }

        self.start = first;
        self.end = end;
        self.stats.allocated_bytes = 2 * HEADER_SIZE;
        self.stats.free_bytes = total - self.stats.allocated_bytes;

        debug!(
            "heap initialized over {start:#x}..{end:#x}, {} bytes free",
            self.stats.free_bytes
        );
        Ok(())
    }

    /// Returns the number of bytes in the managed range.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.stats.free_bytes + self.stats.allocated_bytes
    }

    /// Returns the current byte counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Allocates at least `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// Returns `None` for a zero-sized request without touching the heap.
    /// Otherwise, runs a first-fit scan; if it fails, merges adjacent free
    /// blocks once and scans again. A second failure records
    /// [`ErrorKind::OutOfMemory`] in the [last error](crate::last_error) slot.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let Some(size) = size.checked_next_multiple_of(ALIGNMENT) else {
            last_error::record(ErrorKind::OutOfMemory);
            return None;
        };

        if let Some(ptr) = self.first_fit(size) {
            return Some(ptr);
        }

        let merged = self.coalesce();
        debug!("heap: no block fits {size} bytes, merged {merged} free block(s)");

        if let Some(ptr) = self.first_fit(size) {
            return Some(ptr);
        }

        warn!(
            "heap: out of memory allocating {size} bytes ({} bytes free)",
            self.stats.free_bytes
        );
        last_error::record(ErrorKind::OutOfMemory);
        None
    }

    /// Returns a block to the heap. Neighboring free blocks are not merged.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is outside the heap or its header is not tagged
    /// allocated. Either means the block chain is no longer trustworthy.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap, and the caller must not
    /// use the block afterwards.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = self.live_block(ptr);
            let available = BlockHeader::available(block);
            BlockHeader::set_tag(block, BlockTag::Free);
            self.stats.allocated_bytes -= available;
            self.stats.free_bytes += available;
        }
        trace!("heap: released {:#x}", ptr.as_ptr().addr());
    }

    /// Changes the size of an allocation.
    ///
    /// - `None` behaves as [`allocate`](Self::allocate).
    /// - A zero `new_size` releases the block and returns `None`.
    /// - If the block already holds `new_size` bytes, `ptr` is returned
    ///   unchanged. Blocks never shrink in place.
    /// - Otherwise the payload moves to a new block. On failure the old
    ///   block is left intact and `None` is returned.
    ///
    /// # Panics
    ///
    /// Panics on the same conditions as [`release`](Self::release).
    ///
    /// # Safety
    ///
    /// `ptr`, if present, must be a live allocation of this heap. If a
    /// different pointer is returned, the old one must not be used anymore.
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            unsafe {
                self.release(ptr);
            }
            return None;
        }

        let available = unsafe { BlockHeader::available(self.live_block(ptr)) };
        if available >= new_size {
            return Some(ptr);
        }

        let new_ptr = self.allocate(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), available);
            self.release(ptr);
        }
        Some(new_ptr)
    }

    /// Returns the number of bytes usable through `ptr`.
    ///
    /// # Panics
    ///
    /// Panics on the same conditions as [`release`](Self::release).
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    #[must_use]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { BlockHeader::available(self.live_block(ptr)) }
    }

    /// Iterates over every block in address order, ending with the sentinel.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            current: self.start,
            _heap: self,
        }
    }

    /// Writes a table of all blocks to `w`.
    pub fn dump<W>(&self, w: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        writeln!(
            w,
            "heap {:#x}..{:#x}: {} free, {} allocated",
            self.start.addr(),
            self.end,
            self.stats.free_bytes,
            self.stats.allocated_bytes
        )?;
        for block in self.blocks() {
            let tag = match block.tag {
                BlockTag::Allocated => "allocated",
                BlockTag::Free => "free",
                BlockTag::Sentinel => "sentinel",
            };
            writeln!(w, "  {:#x} {tag:>9} {}", block.header, block.size)?;
        }
        Ok(())
    }

    /// Walks the block chain and verifies its structural invariants.
    ///
    /// Checks that links strictly ascend, that exactly one sentinel ends the
    /// range, and that the byte counters match the blocks.
    ///
    /// # Panics
    ///
    /// Panics if a header carries an unknown tag.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        ensure!(!self.start.is_null(), UninitializedSnafu);

        let sentinel_addr = self.end - HEADER_SIZE;
        let mut counted = 0;
        let mut block = self.start;
        unsafe {
            loop {
                let addr = block.addr();
                ensure!(addr <= sentinel_addr, BrokenLinkSnafu { addr });
                let next = BlockHeader::next(block);
                match BlockHeader::tag(block) {
                    BlockTag::Sentinel => {
                        ensure!(
                            addr == sentinel_addr && ptr::eq(next, block),
                            MisplacedSentinelSnafu { addr }
                        );
                        break;
                    }
                    tag => {
                        ensure!(
                            next.addr() >= addr + HEADER_SIZE && next.addr() <= sentinel_addr,
                            BrokenLinkSnafu { addr }
                        );
                        if tag == BlockTag::Free {
                            counted += BlockHeader::available(block);
                        }
                    }
                }
                block = next;
            }
        }

        ensure!(
            counted == self.stats.free_bytes,
            FreeBytesMismatchSnafu {
                recorded: self.stats.free_bytes,
                counted,
            }
        );
        let total = self.end - self.start.addr();
        ensure!(self.total_bytes() == total, TotalMismatchSnafu { total });
        Ok(())
    }

    fn first_fit(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.start.is_null() {
            return None;
        }

        let mut block = self.start;
        unsafe {
            loop {
                match BlockHeader::tag(block) {
                    BlockTag::Sentinel => return None,
                    BlockTag::Allocated => {}
                    BlockTag::Free => {
                        if BlockHeader::available(block) >= size {
                            return Some(self.occupy(block, size));
                        }
                    }
                }
                block = BlockHeader::next(block);
            }
        }
    }

    /// Tags `block` allocated and splits off the tail if it can hold a header.
    ///
    /// # Safety
    ///
    /// `block` must be a free block with at least `size` available bytes.
    unsafe fn occupy(&mut self, block: *mut BlockHeader, size: usize) -> NonNull<u8> {
        unsafe {
            let available = BlockHeader::available(block);
            let payload = BlockHeader::payload(block);
            BlockHeader::set_tag(block, BlockTag::Allocated);

            if available - size < HEADER_SIZE {
                self.stats.allocated_bytes += available;
                self.stats.free_bytes -= available;
            } else {
                #[expect(clippy::cast_ptr_alignment)]
                let rest = payload.add(size).cast::<BlockHeader>();
                rest.write(BlockHeader {
                    next: BlockHeader::next(block),
                    tag: BlockTag::Free as usize,
                });
                (*block).next = rest;
                self.stats.allocated_bytes += size + HEADER_SIZE;
                self.stats.free_bytes -= size + HEADER_SIZE;
            }

            trace!("heap: allocated {size} bytes at {:#x}", payload.addr());
            NonNull::new_unchecked(payload)
        }
    }

    /// Merges every run of adjacent free blocks. Returns how many headers
    /// were absorbed.
    pub(crate) fn coalesce(&mut self) -> usize {
        if self.start.is_null() {
            return 0;
        }

        let mut merged = 0;
        let mut block = self.start;
        unsafe {
            loop {
                match BlockHeader::tag(block) {
                    BlockTag::Sentinel => break,
                    BlockTag::Allocated => {}
                    BlockTag::Free => loop {
                        let next = BlockHeader::next(block);
                        if BlockHeader::tag(next) != BlockTag::Free {
                            break;
                        }
                        (*block).next = BlockHeader::next(next);
                        merged += 1;
                    },
                }
                block = BlockHeader::next(block);
            }
        }

        self.stats.free_bytes += merged * HEADER_SIZE;
        self.stats.allocated_bytes -= merged * HEADER_SIZE;
        merged
    }

    /// Returns the header of a live allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must not point into memory the heap does not own.
    unsafe fn live_block(&self, ptr: NonNull<u8>) -> *mut BlockHeader {
        let addr = ptr.as_ptr().addr();
        assert!(
            !self.start.is_null()
                && addr >= self.start.addr() + HEADER_SIZE
                && addr < self.end - HEADER_SIZE
                && addr.is_multiple_of(ALIGNMENT),
            "pointer {addr:#x} does not belong to the heap"
        );

        unsafe {
            let block = BlockHeader::from_payload(ptr.as_ptr());
            let tag = BlockHeader::tag(block);
            assert!(
                tag == BlockTag::Allocated,
                "heap block at {addr:#x} is {tag:?}, not allocated"
            );
            block
        }
    }
}

impl SegmentSource for Heap {
    fn allocate_segment(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.allocate(size)
    }

    unsafe fn release_segment(&mut self, ptr: NonNull<u8>, _size: usize) {
        unsafe { self.release(ptr) }
    }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
    current: *mut BlockHeader,
    _heap: &'a Heap,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() {
            return None;
        }

        let block = self.current;
        unsafe {
            let tag = BlockHeader::tag(block);
            let size = if tag == BlockTag::Sentinel {
                self.current = ptr::null_mut();
                0
            } else {
                self.current = BlockHeader::next(block);
                BlockHeader::available(block)
            };
            Some(BlockInfo {
                header: block.addr(),
                size,
                tag,
            })
        }
    }
}
