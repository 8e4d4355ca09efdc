//! The segment manager: one allocation domain spread over several upstream
//! blocks.
//!
//! Each *segment* is a single block borrowed from the upstream allocator
//! and reinterpreted in place as a freelist of smaller blocks. All segment
//! metadata (the upstream pointer, the freelist head, the occupancy count)
//! lives outside the segment, so a drained segment can be handed back
//! upstream without touching its bytes.
use core::{cell::Cell, ptr::NonNull};

use crate::{
    alloc::BlockAllocator,
    error::{PoolError, PoolResult},
    freelist::BlockLinks,
    ptr::PoolPointer,
};

/// The offset type used for in-segment free links.
type SegOffset = u16;

/// Out-of-segment metadata for one segment slot.
pub(crate) struct SegmentMeta<P: PoolPointer> {
    /// The upstream block backing this segment; null marks the slot
    /// invalid.
    ptr: Cell<P>,
    head: Cell<SegOffset>,
    count: Cell<SegOffset>,
}

impl<P: PoolPointer> SegmentMeta<P> {
    fn new() -> Self {
        Self {
            ptr: Cell::new(P::null()),
            head: Cell::new(SegOffset::MAX),
            count: Cell::new(0),
        }
    }

    #[inline]
    fn is_valid(&self) -> bool {
        !self.ptr.get().is_null()
    }
}

/// A fixed array of segments, all subdividing upstream blocks into blocks
/// of `BLOCK_SIZE` bytes.
///
/// The manager is a non-unique, reusable component: it does not hold a
/// reference to the upstream allocator, every operation that needs one
/// takes it as a parameter. `BLOCKS_PER_SEGMENT` must equal
/// `U::BLOCK_SIZE / BLOCK_SIZE` and `MAX_SEGMENTS` must leave room for the
/// enclosing manager-node fields in one upstream block; both are checked
/// at compile time.
pub struct SegmentManager<U, const BLOCK_SIZE: usize, const BLOCKS_PER_SEGMENT: usize, const MAX_SEGMENTS: usize>
where
    U: BlockAllocator,
{
    /// One past the highest slot ever used. Never decreases except on
    /// reset.
    high_water_mark: Cell<u16>,
    segments: [SegmentMeta<U::Pointer>; MAX_SEGMENTS],
}

impl<U, const BLOCK_SIZE: usize, const BLOCKS_PER_SEGMENT: usize, const MAX_SEGMENTS: usize>
    SegmentManager<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>
where
    U: BlockAllocator,
{
    /// Evaluates successfully if the parameters are valid.
    pub(crate) const VALID: () = {
        assert!(BLOCK_SIZE.is_power_of_two(), "`BLOCK_SIZE` must be a power of two");
        assert!(
            U::BLOCK_SIZE >= BLOCK_SIZE,
            "upstream block size must be >= requested block size"
        );
        assert!(
            U::BLOCK_SIZE % BLOCK_SIZE == 0,
            "upstream block size must be a multiple of requested block size"
        );
        assert!(
            BLOCKS_PER_SEGMENT == U::BLOCK_SIZE / BLOCK_SIZE,
            "`BLOCKS_PER_SEGMENT` must equal `U::BLOCK_SIZE / BLOCK_SIZE`"
        );
        assert!(BLOCKS_PER_SEGMENT >= 1, "at least one block must fit in an upstream block");
        assert!(
            BLOCKS_PER_SEGMENT < SegOffset::MAX as usize,
            "too many blocks per segment for the in-segment offset type"
        );
        assert!(MAX_SEGMENTS >= 1, "`MAX_SEGMENTS` must be at least 1");
        assert!(MAX_SEGMENTS < u16::MAX as usize, "`MAX_SEGMENTS` out of range");
    };

    /// The maximum number of blocks this manager can have outstanding.
    pub const MAX_BLOCK_COUNT: usize = BLOCKS_PER_SEGMENT * MAX_SEGMENTS;

    /// A manager with no segments.
    pub fn new() -> Self {
        let () = Self::VALID;
        Self {
            high_water_mark: Cell::new(0),
            segments: core::array::from_fn(|_| SegmentMeta::new()),
        }
    }

    /// The freelist view over a valid segment's upstream block.
    ///
    /// # Panics
    ///
    /// Panics (via `to_raw`) if the upstream pointer cannot be resolved.
    fn links(&self, meta: &SegmentMeta<U::Pointer>) -> BlockLinks<SegOffset, BLOCK_SIZE, BLOCKS_PER_SEGMENT> {
        debug_assert!(meta.is_valid());
        let base = NonNull::new(meta.ptr.get().to_raw()).expect("upstream block resolved to null");
        // Safety: the upstream block spans `U::BLOCK_SIZE ==
        //         BLOCK_SIZE * BLOCKS_PER_SEGMENT` bytes and is borrowed by
        //         this segment until released.
        unsafe { BlockLinks::new(base) }
    }

    /// Allocate one block from the first segment with capacity, opening a
    /// new segment if none has any.
    pub fn try_allocate(&self, upstream: &U) -> PoolResult<NonNull<u8>> {
        for meta in &self.segments[..self.high_water_mark.get() as usize] {
            if !meta.is_valid() || meta.count.get() == 0 {
                continue;
            }
            // Safety: head/count are this segment's own list state.
            if let Ok(block) = unsafe { self.links(meta).pop(&meta.head, &meta.count) } {
                return Ok(block);
            }
        }
        self.allocate_new_segment(upstream)
    }

    /// Return `block` to its owning segment; a segment that becomes fully
    /// free is released upstream and its slot invalidated.
    ///
    /// Fails with [`PoolError::NotOwned`] when no valid segment contains
    /// `block`.
    pub fn deallocate(&self, block: NonNull<u8>, upstream: &U) -> PoolResult {
        let segment_id = self.find_segment_for_pointer(block)?;
        let meta = &self.segments[segment_id];
        // Safety: ownership was just established; the caller relinquishes
        //         the block.
        unsafe { self.links(meta).push(block, &meta.head, &meta.count)? };

        if meta.count.get() as usize >= BLOCKS_PER_SEGMENT {
            log::trace!("segment manager: releasing drained segment {}", segment_id);
            upstream.deallocate_block(meta.ptr.get())?;
            meta.ptr.set(U::Pointer::null());
        }
        Ok(())
    }

    /// Whether some valid segment's byte range contains `block`.
    pub fn owns(&self, block: NonNull<u8>) -> bool {
        self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .any(|meta| meta.is_valid() && self.links(meta).owns(block))
    }

    /// The id of the valid segment containing `ptr`.
    ///
    /// Fails with [`PoolError::NotOwned`] when there is none.
    pub fn find_segment_for_pointer(&self, ptr: NonNull<u8>) -> PoolResult<usize> {
        self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .position(|meta| meta.is_valid() && self.links(meta).owns(ptr))
            .ok_or(PoolError::NotOwned)
    }

    /// The base address of segment `segment_id`.
    ///
    /// Fails with [`PoolError::InvalidSegmentId`] when the id is out of
    /// range or the slot has been released.
    pub fn get_segment_base(&self, segment_id: usize) -> PoolResult<NonNull<u8>> {
        if segment_id >= self.high_water_mark.get() as usize {
            return Err(PoolError::InvalidSegmentId);
        }
        let meta = &self.segments[segment_id];
        if !meta.is_valid() {
            return Err(PoolError::InvalidSegmentId);
        }
        NonNull::new(meta.ptr.get().to_raw()).ok_or(PoolError::InvalidSegmentId)
    }

    /// Release every valid segment upstream. Idempotent; a later
    /// [`reset`](Self::reset) or drop of the enclosing pool may call it
    /// again.
    pub fn cleanup(&self, upstream: &U) {
        for (i, meta) in self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .enumerate()
        {
            if meta.is_valid() {
                log::trace!("segment manager: releasing segment {} on cleanup", i);
                upstream
                    .deallocate_block(meta.ptr.get())
                    .expect("upstream rejected a borrowed segment block");
                // Mark invalid so a second cleanup cannot double-free.
                meta.ptr.set(U::Pointer::null());
            }
        }
    }

    /// Release every segment and return to the initial state.
    pub fn reset(&self, upstream: &U) {
        self.cleanup(upstream);
        self.high_water_mark.set(0);
        for meta in &self.segments {
            meta.ptr.set(U::Pointer::null());
            meta.head.set(SegOffset::MAX);
            meta.count.set(0);
        }
    }

    /// The total number of free blocks across valid segments.
    pub fn available_count(&self) -> usize {
        self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .filter(|meta| meta.is_valid())
            .map(|meta| meta.count.get() as usize)
            .sum()
    }

    /// Whether an allocation could succeed: some valid segment still has a
    /// free block, or a slot is available for a new segment.
    pub fn has_capacity(&self) -> bool {
        let has_free = self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .any(|meta| meta.is_valid() && meta.count.get() != 0);
        has_free || self.segments.iter().any(|meta| !meta.is_valid())
    }

    /// Whether no block is outstanding.
    pub fn is_empty(&self) -> bool {
        self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .all(|meta| !meta.is_valid() || meta.count.get() as usize == BLOCKS_PER_SEGMENT)
    }

    /// The number of valid segments. O(n).
    pub fn segment_count(&self) -> usize {
        self.segments[..self.high_water_mark.get() as usize]
            .iter()
            .filter(|meta| meta.is_valid())
            .count()
    }

    /// Borrow one upstream block, thread it into a freelist, and retry the
    /// allocation.
    ///
    /// Fails with [`PoolError::SegmentExhausted`] when all `MAX_SEGMENTS`
    /// slots are valid.
    fn allocate_new_segment(&self, upstream: &U) -> PoolResult<NonNull<u8>> {
        let slot = self
            .segments
            .iter()
            .position(|meta| !meta.is_valid())
            .ok_or(PoolError::SegmentExhausted)?;
        if slot >= self.high_water_mark.get() as usize {
            self.high_water_mark.set(slot as u16 + 1);
        }

        let upstream_ptr = upstream.allocate_block()?;
        let base = NonNull::new(upstream_ptr.to_raw()).expect("upstream returned a null block");

        let meta = &self.segments[slot];
        // Safety: the fresh upstream block is exclusively ours; threading
        //         the links claims every byte of it.
        unsafe { BlockLinks::<SegOffset, BLOCK_SIZE, BLOCKS_PER_SEGMENT>::new(base).reset(&meta.head, &meta.count) };
        meta.ptr.set(upstream_ptr);
        log::trace!(
            "segment manager: opened segment {} ({} blocks of {} bytes)",
            slot,
            BLOCKS_PER_SEGMENT,
            BLOCK_SIZE
        );

        self.try_allocate(upstream)
    }
}

impl<U, const BLOCK_SIZE: usize, const BLOCKS_PER_SEGMENT: usize, const MAX_SEGMENTS: usize> Default
    for SegmentManager<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>
where
    U: BlockAllocator,
{
    fn default() -> Self {
        Self::new()
    }
}
