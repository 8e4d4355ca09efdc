//! The growing pool: a chain of segment managers with compact pointers.
use core::{cell::Cell, marker::PhantomData, mem, ptr::NonNull};

use crate::{
    alloc::BlockAllocator,
    error::{PoolError, PoolResult},
    ptr::{
        registry::{PoolTag, PoolVtable},
        seg::SegPtr,
        PoolPointer,
    },
    segment::SegmentManager,
    slist::{Slist, SlistNode},
};

/// One link of the manager chain, placement-written into a single upstream
/// block.
struct ManagerNode<U, const BLOCK_SIZE: usize, const BLOCKS_PER_SEGMENT: usize, const MAX_SEGMENTS: usize>
where
    U: BlockAllocator,
{
    manager: SegmentManager<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>,
    next: Cell<Option<NonNull<Self>>>,
}

impl<U, const BLOCK_SIZE: usize, const BLOCKS_PER_SEGMENT: usize, const MAX_SEGMENTS: usize> SlistNode
    for ManagerNode<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>
where
    U: BlockAllocator,
{
    fn next(&self) -> Option<NonNull<Self>> {
        self.next.get()
    }

    fn set_next(&self, next: Option<NonNull<Self>>) {
        self.next.set(next);
    }
}

/// An allocator that extends a segment-manager domain across a linked
/// chain of managers, growing on demand up to `MAX_MANAGERS`.
///
/// Each manager node lives inside one upstream block, so the pool consumes
/// upstream blocks for two purposes: manager metadata (one block per
/// manager) and segments (one block each). The chain is prepended on
/// growth; logical manager ids follow creation order, so id 0 is the tail
/// and the newest manager is `manager_count - 1`.
///
/// The pool's pointer type packs `(manager, segment, offset)` into the
/// integer `R`. Raw-pointer round trips require the pool to be
/// [registered](Self::register) for `Tag`; allocation and deallocation do
/// not.
///
/// Two one-byte hint caches remember the last manager that allocated and
/// the last that claimed a raw pointer. They are advisory only; every
/// lookup falls back to a full scan.
pub struct GrowingPool<
    'up,
    U,
    R,
    Tag,
    const BLOCK_SIZE: usize,
    const BLOCKS_PER_SEGMENT: usize,
    const MAX_SEGMENTS: usize,
    const MAX_MANAGERS: usize,
> where
    U: BlockAllocator,
    R: crate::int::BinInteger,
    Tag: PoolTag,
{
    upstream: &'up U,
    managers: Slist<ManagerNode<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>>,
    manager_count: Cell<u8>,
    alloc_hint: Cell<u8>,
    lookup_hint: Cell<u8>,
    _marker: PhantomData<fn() -> (R, Tag)>,
}

impl<
        'up,
        U,
        R,
        Tag,
        const BLOCK_SIZE: usize,
        const BLOCKS_PER_SEGMENT: usize,
        const MAX_SEGMENTS: usize,
        const MAX_MANAGERS: usize,
    > GrowingPool<'up, U, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>
where
    U: BlockAllocator,
    R: crate::int::BinInteger,
    Tag: PoolTag,
{
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        // The segment manager and pointer layers repeat their own checks;
        // these are the pool-level ones.
        assert!(MAX_MANAGERS >= 1, "`MAX_MANAGERS` must be at least 1");
        assert!(
            MAX_MANAGERS <= u8::MAX as usize,
            "`MAX_MANAGERS` exceeds the hint cache range"
        );
        assert!(
            mem::size_of::<ManagerNode<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>>()
                <= U::BLOCK_SIZE,
            "a manager node must fit in one upstream block"
        );
        assert!(
            mem::align_of::<ManagerNode<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>>()
                <= U::BLOCK_ALIGN,
            "a manager node must be placeable at an upstream block boundary"
        );
    };

    /// A pool with no managers, drawing from `upstream`.
    ///
    /// The upstream allocator outlives the pool and must already be usable
    /// (for thin-pointer upstreams, registered) before the first
    /// allocation.
    pub fn new(upstream: &'up U) -> Self {
        let () = Self::VALID;
        let () = SegmentManager::<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>::VALID;
        Self {
            upstream,
            managers: Slist::new(),
            manager_count: Cell::new(0),
            alloc_hint: Cell::new(0),
            lookup_hint: Cell::new(0),
            _marker: PhantomData,
        }
    }

    /// Publish this pool as `Tag`'s allocator-interface, enabling
    /// raw-pointer round trips through its pointer type.
    ///
    /// Fails with [`PoolError::AlreadyRegistered`] if another pool holds
    /// the tag's cell. `Drop` unregisters.
    ///
    /// # Safety
    ///
    /// The pool must not move or be dropped while registered (dropping is
    /// fine; `Drop` unregisters first).
    pub unsafe fn register(&self) -> PoolResult {
        let vtable = PoolVtable {
            get_segment_base: Self::vt_get_segment_base,
            find_manager_for_pointer: Self::vt_find_manager_for_pointer,
            find_segment_in_manager: Self::vt_find_segment_in_manager,
            compute_offset_in_segment: Self::vt_compute_offset_in_segment,
        };
        Tag::registry().register(NonNull::from(self).cast(), vtable)
    }

    /// Withdraw this pool's registration, if it is the registered one.
    pub fn unregister(&self) {
        Tag::registry().unregister(NonNull::from(self).cast());
    }

    /// The manager with logical id `id`.
    ///
    /// The chain is prepended on growth, so id `i` lives at list position
    /// `manager_count - 1 - i`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= manager_count`; public entry points range-check
    /// before coming here.
    fn manager_by_id(&self, id: usize) -> &SegmentManager<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS> {
        let count = self.manager_count.get() as usize;
        assert!(id < count, "manager id beyond the total manager count");
        let mut current = count - 1;
        for node in self.managers.iter() {
            if current == id {
                return &node.manager;
            }
            if current == 0 {
                break;
            }
            current -= 1;
        }
        unreachable!("manager chain shorter than the manager count")
    }

    fn encode_pointer(
        &self,
        manager_id: usize,
        manager: &SegmentManager<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>,
        block: NonNull<u8>,
    ) -> PoolResult<SegPtr<u8, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>>
    {
        let segment_id = manager.find_segment_for_pointer(block)?;
        let base = manager.get_segment_base(segment_id)?;
        let block_addr = block.as_ptr() as usize;
        let base_addr = base.as_ptr() as usize;
        assert!(block_addr >= base_addr, "block before its segment base");
        let byte_offset = block_addr - base_addr;
        debug_assert!(byte_offset % BLOCK_SIZE == 0);
        Ok(SegPtr::new(manager_id, segment_id, byte_offset / BLOCK_SIZE))
    }

    /// Grow the chain by one manager and retry the allocation.
    fn allocate_new_manager(
        &self,
    ) -> PoolResult<SegPtr<u8, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>>
    {
        let count = self.manager_count.get() as usize;
        if count >= MAX_MANAGERS {
            log::debug!("growing pool: manager limit ({}) reached", MAX_MANAGERS);
            return Err(PoolError::ManagerLimit);
        }

        let upstream_ptr = self.upstream.allocate_block()?;
        let raw = NonNull::new(upstream_ptr.to_raw()).expect("upstream returned a null block");
        let node = raw.cast::<ManagerNode<U, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS>>();
        // Safety: the fresh upstream block is exclusively ours, large and
        //         aligned enough per `VALID`.
        unsafe {
            node.as_ptr().write(ManagerNode {
                manager: SegmentManager::new(),
                next: Cell::new(None),
            });
            self.managers.push_front(node);
        }

        let new_id = count;
        self.manager_count.set(new_id as u8 + 1);
        self.alloc_hint.set(new_id as u8);
        log::trace!("growing pool: manager {} created", new_id);

        self.do_allocate_block()
    }

    fn do_allocate_block(
        &self,
    ) -> PoolResult<SegPtr<u8, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>>
    {
        let count = self.manager_count.get() as usize;

        let hint = self.alloc_hint.get() as usize;
        if hint < count {
            let manager = self.manager_by_id(hint);
            if let Ok(block) = manager.try_allocate(self.upstream) {
                return self.encode_pointer(hint, manager, block);
            }
        }

        let mut id = count;
        for node in self.managers.iter() {
            id -= 1;
            if id == hint {
                continue;
            }
            if let Ok(block) = node.manager.try_allocate(self.upstream) {
                self.alloc_hint.set(id as u8);
                return self.encode_pointer(id, &node.manager, block);
            }
        }

        self.allocate_new_manager()
    }

    fn do_deallocate_block(
        &self,
        ptr: SegPtr<u8, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>,
    ) -> PoolResult {
        if ptr.is_null() {
            return Err(PoolError::InvalidPointer);
        }
        let manager_id = ptr.manager_id();
        if manager_id >= self.manager_count.get() as usize {
            return Err(PoolError::InvalidManagerId);
        }
        let manager = self.manager_by_id(manager_id);
        let base = manager
            .get_segment_base(ptr.segment_id())
            .map_err(|_| PoolError::InvalidSegmentId)?;
        // Safety: offsets within a valid segment stay inside its upstream
        //         block.
        let block =
            unsafe { NonNull::new_unchecked(base.as_ptr().add(ptr.offset() * BLOCK_SIZE)) };
        manager.deallocate(block, self.upstream)
        // TODO: release a manager whose segments are all drained so its
        // node block goes back upstream before the pool is dropped.
    }

    /// The id of the manager whose segments contain `ptr`.
    ///
    /// Consults the hint caches first, then scans the chain. Fails with
    /// [`PoolError::NotOwned`] when no manager claims the pointer.
    pub fn find_manager_for_pointer(&self, ptr: NonNull<u8>) -> PoolResult<usize> {
        let count = self.manager_count.get() as usize;

        let alloc_hint = self.alloc_hint.get() as usize;
        if alloc_hint < count && self.manager_by_id(alloc_hint).owns(ptr) {
            self.lookup_hint.set(alloc_hint as u8);
            return Ok(alloc_hint);
        }

        let lookup_hint = self.lookup_hint.get() as usize;
        if lookup_hint < count
            && lookup_hint != alloc_hint
            && self.manager_by_id(lookup_hint).owns(ptr)
        {
            return Ok(lookup_hint);
        }

        let mut id = count;
        for node in self.managers.iter() {
            id -= 1;
            if id == alloc_hint || id == lookup_hint {
                continue;
            }
            if node.manager.owns(ptr) {
                self.lookup_hint.set(id as u8);
                return Ok(id);
            }
        }

        Err(PoolError::NotOwned)
    }

    /// The base address of `segment_id` in `manager_id`.
    pub fn get_segment_base(&self, manager_id: usize, segment_id: usize) -> PoolResult<NonNull<u8>> {
        if manager_id >= self.manager_count.get() as usize {
            return Err(PoolError::InvalidManagerId);
        }
        self.manager_by_id(manager_id).get_segment_base(segment_id)
    }

    /// The id of the segment inside `manager_id` containing `ptr`.
    pub fn find_segment_in_manager(&self, manager_id: usize, ptr: NonNull<u8>) -> PoolResult<usize> {
        if manager_id >= self.manager_count.get() as usize {
            return Err(PoolError::InvalidManagerId);
        }
        self.manager_by_id(manager_id).find_segment_for_pointer(ptr)
    }

    /// The index of `ptr` within `segment_id`, in units of `elem_size`.
    pub fn compute_offset_in_segment(
        &self,
        manager_id: usize,
        segment_id: usize,
        ptr: NonNull<u8>,
        elem_size: usize,
    ) -> PoolResult<usize> {
        let base = self.get_segment_base(manager_id, segment_id)?;
        let addr = ptr.as_ptr() as usize;
        let base_addr = base.as_ptr() as usize;
        if addr < base_addr {
            return Err(PoolError::InvalidPointer);
        }
        let byte_offset = addr - base_addr;
        if byte_offset % elem_size != 0 {
            return Err(PoolError::InvalidPointer);
        }
        Ok(byte_offset / elem_size)
    }

    /// The number of managers currently in the chain.
    pub fn manager_count(&self) -> usize {
        self.manager_count.get() as usize
    }

    // The type-erased resolver functions installed in the registry. Each
    // reconstructs `&Self` from the pointer it was registered with.

    unsafe fn vt_get_segment_base(
        pool: *const (),
        manager_id: usize,
        segment_id: usize,
    ) -> PoolResult<NonNull<u8>> {
        let pool = &*pool.cast::<Self>();
        pool.get_segment_base(manager_id, segment_id)
    }

    unsafe fn vt_find_manager_for_pointer(pool: *const (), ptr: NonNull<u8>) -> PoolResult<usize> {
        let pool = &*pool.cast::<Self>();
        pool.find_manager_for_pointer(ptr)
    }

    unsafe fn vt_find_segment_in_manager(
        pool: *const (),
        manager_id: usize,
        ptr: NonNull<u8>,
    ) -> PoolResult<usize> {
        let pool = &*pool.cast::<Self>();
        pool.find_segment_in_manager(manager_id, ptr)
    }

    unsafe fn vt_compute_offset_in_segment(
        pool: *const (),
        manager_id: usize,
        segment_id: usize,
        ptr: NonNull<u8>,
        elem_size: usize,
    ) -> PoolResult<usize> {
        let pool = &*pool.cast::<Self>();
        pool.compute_offset_in_segment(manager_id, segment_id, ptr, elem_size)
    }
}

impl<
        'up,
        U,
        R,
        Tag,
        const BLOCK_SIZE: usize,
        const BLOCKS_PER_SEGMENT: usize,
        const MAX_SEGMENTS: usize,
        const MAX_MANAGERS: usize,
    > BlockAllocator
    for GrowingPool<'up, U, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>
where
    U: BlockAllocator,
    R: crate::int::BinInteger,
    Tag: PoolTag,
{
    type Pointer = SegPtr<u8, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>;

    const BLOCK_SIZE: usize = BLOCK_SIZE;
    const BLOCK_ALIGN: usize = crate::effective_block_align(BLOCK_SIZE);
    const MAX_BLOCK_COUNT: usize = BLOCKS_PER_SEGMENT * MAX_SEGMENTS * MAX_MANAGERS;
    const TOTAL_SIZE: usize = BLOCK_SIZE * Self::MAX_BLOCK_COUNT;

    /// Allocate one block, trying the hinted manager, then every manager
    /// in chain order, then growing the chain.
    fn allocate_block(&self) -> PoolResult<Self::Pointer> {
        self.do_allocate_block()
    }

    /// Return one block to the manager named by the pointer.
    ///
    /// Fails with [`PoolError::InvalidPointer`] on null and
    /// [`PoolError::InvalidManagerId`] when the pointer's manager id is
    /// out of range.
    fn deallocate_block(&self, ptr: Self::Pointer) -> PoolResult {
        self.do_deallocate_block(ptr)
    }

    /// Release every segment of every manager and clear the hint caches.
    ///
    /// The manager nodes themselves stay in the chain, ready for reuse.
    fn reset(&self) {
        for node in self.managers.iter() {
            node.manager.reset(self.upstream);
        }
        self.alloc_hint.set(0);
        self.lookup_hint.set(0);
    }

    fn available(&self) -> usize {
        self.managers
            .iter()
            .map(|node| node.manager.available_count())
            .sum()
    }
}

impl<
        'up,
        U,
        R,
        Tag,
        const BLOCK_SIZE: usize,
        const BLOCKS_PER_SEGMENT: usize,
        const MAX_SEGMENTS: usize,
        const MAX_MANAGERS: usize,
    > Drop for GrowingPool<'up, U, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>
where
    U: BlockAllocator,
    R: crate::int::BinInteger,
    Tag: PoolTag,
{
    fn drop(&mut self) {
        self.unregister();
        while let Some(node) = self.managers.pop_front() {
            // Safety: chain nodes stay valid until popped; after cleanup
            //         the node block holds no live segment.
            unsafe {
                node.as_ref().manager.cleanup(self.upstream);
            }
            let ptr = U::Pointer::from_raw(node.as_ptr().cast());
            self.upstream
                .deallocate_block(ptr)
                .expect("upstream rejected a manager node block");
        }
    }
}

#[cfg(test)]
mod tests;
