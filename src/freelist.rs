//! The intrusive, array-backed LIFO free-block pool.
//!
//! A free block stores the offset of the next free block in its first
//! bytes; an allocated block is entirely caller-owned. The link walk
//! therefore costs no memory beyond the blocks themselves.
use core::{cell::Cell, cell::UnsafeCell, marker::PhantomData, mem, mem::MaybeUninit, ptr::NonNull};

use crate::{
    error::{PoolError, PoolResult},
    int::BinInteger,
};

/// A view of `BLOCK_COUNT` blocks of `BLOCK_SIZE` bytes threaded into a
/// LIFO by in-place offset links.
///
/// The view does not own the storage, and the list head and free count are
/// passed in by the caller, so several views can share the same link
/// semantics over different backing memory: the inline [`Freelist`] uses
/// one over its own slab, and a segment manager uses one per borrowed
/// upstream block.
pub(crate) struct BlockLinks<O, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    base: NonNull<u8>,
    _marker: PhantomData<fn() -> O>,
}

impl<O: BinInteger, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    BlockLinks<O, BLOCK_SIZE, BLOCK_COUNT>
{
    /// Evaluates successfully if the parameters are valid.
    pub(crate) const VALID: () = {
        assert!(BLOCK_SIZE.is_power_of_two(), "`BLOCK_SIZE` must be a power of two");
        assert!(BLOCK_COUNT.is_power_of_two(), "`BLOCK_COUNT` must be a power of two");
        assert!(
            BLOCK_SIZE >= mem::size_of::<O>(),
            "a block must be able to hold its free link"
        );
        // The all-ones value of `O` is the null sentinel, so every valid
        // offset must stay below it.
        assert!(
            (O::BITS >= usize::BITS) || (BLOCK_COUNT <= (1 << O::BITS) - 1),
            "`O` cannot represent `BLOCK_COUNT` offsets plus the null sentinel"
        );
        assert!(O::BITS <= 16, "offset types wider than 16 bits defeat the point");
    };

    /// A view over the blocks starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to `BLOCK_SIZE * BLOCK_COUNT` bytes that stay
    /// valid for reads and writes for the lifetime of the view, and every
    /// access to those bytes while the view is in use must go through it.
    #[inline]
    pub(crate) unsafe fn new(base: NonNull<u8>) -> Self {
        let () = Self::VALID;
        Self {
            base,
            _marker: PhantomData,
        }
    }

    /// The address of block 0.
    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    fn block_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < BLOCK_COUNT);
        // Safety: `index` is in range, so the result is within the storage.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * BLOCK_SIZE)) }
    }

    /// Whether `ptr` lies inside the storage span.
    #[inline]
    pub(crate) fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + BLOCK_SIZE * BLOCK_COUNT
    }

    /// The index of the block at `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not on a block boundary; a block handed back at
    /// the wrong address means the storage has been corrupted.
    #[inline]
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> usize {
        debug_assert!(self.owns(ptr));
        let byte_offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        assert!(
            byte_offset % BLOCK_SIZE == 0,
            "block is not aligned to a block boundary"
        );
        byte_offset / BLOCK_SIZE
    }

    /// Read the free link stored in block `index`.
    ///
    /// # Safety
    ///
    /// Block `index` must currently be free (its first bytes hold a link).
    #[inline]
    unsafe fn read_link(&self, index: usize) -> O {
        self.block_at(index).as_ptr().cast::<O>().read_unaligned()
    }

    /// # Safety
    ///
    /// Block `index` must not be caller-owned.
    #[inline]
    unsafe fn write_link(&self, index: usize, next: O) {
        self.block_at(index).as_ptr().cast::<O>().write_unaligned(next);
    }

    /// Link every block into the list in reverse order, leaving block 0 at
    /// the head and `count` at `BLOCK_COUNT`. O(n).
    ///
    /// # Safety
    ///
    /// No caller-owned block may remain; this overwrites every block's
    /// first bytes.
    pub(crate) unsafe fn reset(&self, head: &Cell<O>, count: &Cell<O>) {
        head.set(O::MAX);
        count.set(O::ZERO);
        for index in (0..BLOCK_COUNT).rev() {
            self.write_link(index, head.get());
            head.set(O::from_usize(index));
            count.set(O::from_usize(count.get().as_usize() + 1));
        }
    }

    /// Detach and return the block at the head.
    ///
    /// Fails with [`PoolError::ListEmpty`] when the list holds no block.
    ///
    /// # Safety
    ///
    /// `head` and `count` must describe this view's storage.
    pub(crate) unsafe fn pop(&self, head: &Cell<O>, count: &Cell<O>) -> PoolResult<NonNull<u8>> {
        if head.get() == O::MAX {
            return Err(PoolError::ListEmpty);
        }
        let index = head.get().as_usize();
        debug_assert!(index < BLOCK_COUNT);
        let block = self.block_at(index);
        head.set(self.read_link(index));
        count.set(O::from_usize(count.get().as_usize() - 1));
        Ok(block)
    }

    /// Insert `block` at the head.
    ///
    /// Fails with [`PoolError::ListFull`] when every block is already
    /// linked, and with [`PoolError::InvalidPointer`] when `block` is not
    /// inside the storage span.
    ///
    /// # Safety
    ///
    /// `head` and `count` must describe this view's storage, and the caller
    /// must relinquish the block.
    pub(crate) unsafe fn push(
        &self,
        block: NonNull<u8>,
        head: &Cell<O>,
        count: &Cell<O>,
    ) -> PoolResult {
        if count.get().as_usize() >= BLOCK_COUNT {
            return Err(PoolError::ListFull);
        }
        if !self.owns(block) {
            return Err(PoolError::InvalidPointer);
        }
        let index = self.index_of(block);
        self.write_link(index, head.get());
        head.set(O::from_usize(index));
        count.set(O::from_usize(count.get().as_usize() + 1));
        Ok(())
    }

    /// The block at the head, without detaching it.
    ///
    /// Fails with [`PoolError::ListEmpty`] when the list holds no block.
    pub(crate) fn head_block(&self, head: &Cell<O>) -> PoolResult<NonNull<u8>> {
        if head.get() == O::MAX {
            return Err(PoolError::ListEmpty);
        }
        Ok(self.block_at(head.get().as_usize()))
    }
}

#[repr(align(64))]
struct Slab<const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>(
    [[MaybeUninit<u8>; BLOCK_SIZE]; BLOCK_COUNT],
);

/// A freelist owning its slab inline.
///
/// `O` is the offset type; it must be able to represent `BLOCK_COUNT`
/// offsets plus the null sentinel, which is checked at compile time. The
/// freelist starts full (every block linked).
pub struct Freelist<O, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    head: Cell<O>,
    count: Cell<O>,
    storage: UnsafeCell<Slab<BLOCK_SIZE, BLOCK_COUNT>>,
}

impl<O: BinInteger, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    Freelist<O, BLOCK_SIZE, BLOCK_COUNT>
{
    /// A freelist with every block linked, block 0 at the head.
    pub fn new() -> Self {
        let list = Self {
            head: Cell::new(O::MAX),
            count: Cell::new(O::ZERO),
            storage: UnsafeCell::new(Slab([[MaybeUninit::uninit(); BLOCK_SIZE]; BLOCK_COUNT])),
        };
        list.reset();
        list
    }

    #[inline]
    fn links(&self) -> BlockLinks<O, BLOCK_SIZE, BLOCK_COUNT> {
        // Safety: the view covers exactly our slab, which lives as long as
        //         `self` and is only accessed through these views.
        unsafe {
            let blocks = core::ptr::addr_of_mut!((*self.storage.get()).0);
            BlockLinks::new(NonNull::new_unchecked(blocks.cast()))
        }
    }

    /// The address of block 0. Published as the thin-pointer base by the
    /// enclosing allocator.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.links().base()
    }

    /// The number of blocks currently linked.
    #[inline]
    pub fn available(&self) -> usize {
        self.count.get().as_usize()
    }

    /// Whether every block is linked.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.available() >= BLOCK_COUNT
    }

    /// Whether no block is linked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.get() == O::MAX
    }

    /// Whether `ptr` lies inside the slab.
    #[inline]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.links().owns(ptr)
    }

    /// Relink every block, dropping all outstanding allocations.
    pub fn reset(&self) {
        // Safety: the caller-facing contract of `reset` (see
        //         `BlockAllocator::reset`) is that no outstanding block is
        //         referenced anymore.
        unsafe { self.links().reset(&self.head, &self.count) }
    }

    /// Detach and return the head block.
    pub fn pop(&self) -> PoolResult<NonNull<u8>> {
        // Safety: `head`/`count` are this slab's own list state.
        unsafe { self.links().pop(&self.head, &self.count) }
    }

    /// Insert `block` at the head.
    pub fn push(&self, block: NonNull<u8>) -> PoolResult {
        // Safety: as above; a pushed block is relinquished by contract.
        unsafe { self.links().push(block, &self.head, &self.count) }
    }

    /// The head block without detaching it.
    pub fn head_block(&self) -> PoolResult<NonNull<u8>> {
        self.links().head_block(&self.head)
    }

    /// The index of `ptr`'s block within the slab.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not on a block boundary.
    #[inline]
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> usize {
        self.links().index_of(ptr)
    }

    #[inline]
    pub(crate) fn block_at(&self, index: usize) -> NonNull<u8> {
        self.links().block_at(index)
    }
}

impl<O: BinInteger, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Default
    for Freelist<O, BLOCK_SIZE, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}
