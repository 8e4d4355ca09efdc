//! The local buffer: a uniform-block allocator over one fixed slab.
use core::{cell::Cell, ptr::NonNull};

use crate::{
    alloc::{BlockAllocator, RawResource},
    error::{PoolError, PoolResult},
    freelist::Freelist,
    int::BinInteger,
    ptr::{registry::PoolTag, thin::ThinPtr, PoolPointer},
};

/// A fixed-slab, fixed-block-size allocator publishing thin pointers.
///
/// The buffer owns a slab of `BLOCK_COUNT` blocks of `BLOCK_SIZE` bytes and
/// hands them out in LIFO order. Its pointer type stores a single `O`
/// offset, which is what makes `Tag` necessary: the offset is resolved
/// against the one base address registered for the tag, so exactly one
/// buffer per tag may be [registered](Self::register) at a time.
///
/// The buffer is fully usable without registration; only raw-pointer
/// round trips through [`ThinPtr`] need the registry.
///
/// # Examples
///
/// ```rust
/// use blockpool::{define_pool_tag, BlockAllocator, LocalBuffer};
///
/// define_pool_tag!(ScratchTag);
///
/// let buffer: LocalBuffer<u8, ScratchTag, 64, 4> = LocalBuffer::new();
/// let a = buffer.allocate_block().unwrap();
/// let b = buffer.allocate_block().unwrap();
/// assert_ne!(a, b);
/// buffer.deallocate_block(a).unwrap();
/// buffer.deallocate_block(b).unwrap();
/// assert_eq!(buffer.available(), 4);
/// ```
pub struct LocalBuffer<'up, O, Tag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
where
    O: BinInteger,
    Tag: PoolTag,
{
    list: Freelist<O, BLOCK_SIZE, BLOCK_COUNT>,
    upstream: Cell<Option<&'up dyn RawResource>>,
    _marker: core::marker::PhantomData<fn() -> Tag>,
}

impl<'up, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    LocalBuffer<'up, O, Tag, BLOCK_SIZE, BLOCK_COUNT>
{
    /// A buffer with every block free.
    pub fn new() -> Self {
        Self {
            list: Freelist::new(),
            upstream: Cell::new(None),
            _marker: core::marker::PhantomData,
        }
    }

    /// Publish this buffer's base address for `Tag`.
    ///
    /// Fails with [`PoolError::AlreadyRegistered`] if another buffer
    /// already holds the tag's cell. `Drop` withdraws the registration.
    ///
    /// # Safety
    ///
    /// The buffer must not move or be dropped while registered. Dropping
    /// is fine (`Drop` unregisters first), but any other way of ending
    /// the registration must go through [`unregister`](Self::unregister).
    pub unsafe fn register(&self) -> PoolResult {
        Tag::thin_base().publish(self.base())
    }

    /// Withdraw this buffer's registration, if it is the registered one.
    pub fn unregister(&self) {
        Tag::thin_base().withdraw(self.base());
    }

    /// The address of block 0.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.list.base()
    }

    /// Use `upstream` as the fallback for requests this buffer cannot
    /// serve (see [`allocate_bytes`](Self::allocate_bytes) and the foreign
    /// branch of `deallocate_block`).
    pub fn set_upstream(&self, upstream: Option<&'up dyn RawResource>) {
        self.upstream.set(upstream);
    }

    fn do_allocate_block(&self) -> PoolResult<ThinPtr<u8, O, Tag, BLOCK_SIZE>> {
        let block = self.list.pop().map_err(|_| {
            log::debug!("local buffer: out of blocks");
            PoolError::OutOfMemory
        })?;
        Ok(ThinPtr::from_offset(O::from_usize(self.list.index_of(block))))
    }

    fn do_deallocate_block(&self, ptr: ThinPtr<u8, O, Tag, BLOCK_SIZE>) -> PoolResult {
        if ptr.is_null() {
            return Err(PoolError::InvalidPointer);
        }
        // Resolve against our own base rather than the registry; the
        // offset is ours regardless of who is registered.
        let offset = ptr.offset().as_usize();
        if offset >= BLOCK_COUNT {
            let raw = self.base().as_ptr().wrapping_add(offset * BLOCK_SIZE);
            // Safety: `base` is non-null and the wrapping offset cannot
            //         produce address zero within an object's span.
            return self.foreign_fallback(unsafe { NonNull::new_unchecked(raw) });
        }
        let block = self.list.block_at(offset);
        match self.list.push(block) {
            Ok(()) => Ok(()),
            Err(PoolError::InvalidPointer) => self.foreign_fallback(block),
            Err(e) => Err(e),
        }
    }

    /// Forward a block that is not ours to the upstream resource, or
    /// propagate the rejection.
    fn foreign_fallback(&self, block: NonNull<u8>) -> PoolResult {
        match self.upstream.get() {
            Some(upstream) => {
                // Safety: the block was allocated with this size/alignment
                //         by whoever owns it; forwarding is the documented
                //         fallback contract.
                unsafe { upstream.deallocate(block, BLOCK_SIZE, <Self as BlockAllocator>::BLOCK_ALIGN) };
                Ok(())
            }
            None => Err(PoolError::InvalidPointer),
        }
    }

    /// Serve a general-purpose request.
    ///
    /// Requests with `size <= BLOCK_SIZE` and `align <= BLOCK_ALIGN` are
    /// satisfied from the freelist; anything else is forwarded to the
    /// upstream resource, or fails with [`PoolError::OutOfMemory`] when
    /// none is set. Unlike the block interface, the byte facade hands out
    /// raw addresses, so the buffer must be [registered](Self::register)
    /// first.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero, `align` is not a power of two, or
    /// `align > size`; malformed layouts are caller bugs.
    pub fn allocate_bytes(&self, size: usize, align: usize) -> PoolResult<NonNull<u8>> {
        assert!(size != 0, "zero-size allocation");
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(align <= size, "alignment cannot exceed size");

        if size <= BLOCK_SIZE && align <= <Self as BlockAllocator>::BLOCK_ALIGN {
            let ptr = self.do_allocate_block()?;
            // Safety: a non-null thin pointer we just produced resolves
            //         into our slab.
            return Ok(unsafe { NonNull::new_unchecked(ptr.to_raw()) });
        }
        match self.upstream.get() {
            // Safety: size/align were validated above.
            Some(upstream) => unsafe { upstream.allocate(size, align) }
                .ok_or(PoolError::OutOfMemory),
            None => Err(PoolError::OutOfMemory),
        }
    }

    /// Return an allocation obtained from [`allocate_bytes`] with the same
    /// `size` and `align`.
    pub fn deallocate_bytes(&self, ptr: NonNull<u8>, size: usize, align: usize) -> PoolResult {
        assert!(size != 0, "zero-size deallocation");
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(align <= size, "alignment cannot exceed size");

        if size <= BLOCK_SIZE && align <= <Self as BlockAllocator>::BLOCK_ALIGN {
            return self.do_deallocate_block(PoolPointer::from_raw(ptr.as_ptr()));
        }
        match self.upstream.get() {
            Some(upstream) => {
                // Safety: symmetric with the `allocate_bytes` forwarding arm.
                unsafe { upstream.deallocate(ptr, size, align) };
                Ok(())
            }
            None => Err(PoolError::InvalidPointer),
        }
    }
}

impl<'up, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    BlockAllocator for LocalBuffer<'up, O, Tag, BLOCK_SIZE, BLOCK_COUNT>
{
    type Pointer = ThinPtr<u8, O, Tag, BLOCK_SIZE>;

    const BLOCK_SIZE: usize = BLOCK_SIZE;
    const BLOCK_ALIGN: usize = crate::effective_block_align(BLOCK_SIZE);
    const MAX_BLOCK_COUNT: usize = BLOCK_COUNT;
    const TOTAL_SIZE: usize = BLOCK_SIZE * BLOCK_COUNT;

    /// Allocate one block. Fails with [`PoolError::OutOfMemory`] when the
    /// freelist is empty.
    fn allocate_block(&self) -> PoolResult<Self::Pointer> {
        self.do_allocate_block()
    }

    /// Return one block.
    ///
    /// Fails with [`PoolError::InvalidPointer`] on null. A block the
    /// freelist rejects as foreign is forwarded to the upstream resource
    /// when one is set; otherwise the rejection propagates.
    fn deallocate_block(&self, ptr: Self::Pointer) -> PoolResult {
        self.do_deallocate_block(ptr)
    }

    fn reset(&self) {
        self.list.reset();
    }

    fn available(&self) -> usize {
        self.list.available()
    }
}

impl<'up, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    RawResource for LocalBuffer<'up, O, Tag, BLOCK_SIZE, BLOCK_COUNT>
{
    unsafe fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.allocate_bytes(size, align).ok()
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let _ = self.deallocate_bytes(ptr, size, align);
    }
}

impl<'up, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Default
    for LocalBuffer<'up, O, Tag, BLOCK_SIZE, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'up, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Drop
    for LocalBuffer<'up, O, Tag, BLOCK_SIZE, BLOCK_COUNT>
{
    fn drop(&mut self) {
        self.unregister();
    }
}
