//! The process-wide, per-tag side tables behind raw-pointer round trips.
//!
//! Each tag type created by [`define_pool_tag!`](crate::define_pool_tag)
//! owns exactly one [`BaseCell`] (for thin pointers) and one
//! [`PoolRegistry`] (for segmented pointers). A pointer type names only its
//! tag, so it can find its allocator without naming the allocator's type:
//! the registry stores a type-erased data pointer plus a table of resolver
//! functions instantiated by the pool at registration time.
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

use crate::error::{PoolError, PoolResult};

/// A tag type isolating one allocator instance's registry cells.
///
/// Two pools instantiated with distinct tags never share a cell, which is
/// the only way two same-shape allocators may coexist. Use
/// [`define_pool_tag!`](crate::define_pool_tag) to create one; the macro
/// generates a fresh marker type together with its statics.
pub trait PoolTag: 'static {
    /// The base-address cell used by thin pointers with this tag.
    fn thin_base() -> &'static BaseCell;

    /// The pool cell used by segmented pointers with this tag.
    fn registry() -> &'static PoolRegistry;
}

/// Defines a marker type implementing [`PoolTag`] with its own registry
/// cells.
///
/// # Examples
///
/// ```rust
/// blockpool::define_pool_tag!(pub MyPoolTag);
/// ```
#[macro_export]
macro_rules! define_pool_tag {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::ptr::registry::PoolTag for $name {
            fn thin_base() -> &'static $crate::ptr::registry::BaseCell {
                static CELL: $crate::ptr::registry::BaseCell =
                    $crate::ptr::registry::BaseCell::new();
                &CELL
            }

            fn registry() -> &'static $crate::ptr::registry::PoolRegistry {
                static CELL: $crate::ptr::registry::PoolRegistry =
                    $crate::ptr::registry::PoolRegistry::new();
                &CELL
            }
        }
    };
}

/// The registered base address of one local buffer.
pub struct BaseCell {
    base: AtomicPtr<u8>,
}

impl BaseCell {
    /// An empty cell.
    pub const fn new() -> Self {
        Self {
            base: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Publish `base` as the tag's base address.
    ///
    /// Fails with [`PoolError::AlreadyRegistered`] if the cell is occupied.
    pub fn publish(&self, base: NonNull<u8>) -> PoolResult {
        self.base
            .compare_exchange(
                core::ptr::null_mut(),
                base.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(drop)
            .map_err(|_| PoolError::AlreadyRegistered)
    }

    /// Clear the cell, but only if it still holds `base`.
    ///
    /// A buffer that lost a registration race must not clear the winner's
    /// entry from its destructor.
    pub fn withdraw(&self, base: NonNull<u8>) {
        let _ = self.base.compare_exchange(
            base.as_ptr(),
            core::ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// The registered base, if any.
    pub fn get(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.base.load(Ordering::Acquire))
    }
}

/// The resolver functions a pool installs when registering.
///
/// Each function receives the erased pool pointer that was registered
/// alongside it and must only be called with that pointer.
#[derive(Clone, Copy)]
pub struct PoolVtable {
    /// Segment base lookup for pointer resolution.
    pub get_segment_base:
        unsafe fn(pool: *const (), manager_id: usize, segment_id: usize) -> PoolResult<NonNull<u8>>,
    /// Owner lookup for raw-pointer conversion.
    pub find_manager_for_pointer: unsafe fn(pool: *const (), ptr: NonNull<u8>) -> PoolResult<usize>,
    /// In-manager owner lookup for raw-pointer conversion.
    pub find_segment_in_manager:
        unsafe fn(pool: *const (), manager_id: usize, ptr: NonNull<u8>) -> PoolResult<usize>,
    /// Offset derivation for raw-pointer conversion.
    pub compute_offset_in_segment: unsafe fn(
        pool: *const (),
        manager_id: usize,
        segment_id: usize,
        ptr: NonNull<u8>,
        elem_size: usize,
    ) -> PoolResult<usize>,
}

struct PoolEntry {
    pool: NonNull<()>,
    vtable: PoolVtable,
}

// Safety: the entry is only a handle; the registry never dereferences it
//         itself, and the resolver functions are only invoked under the
//         crate's single-threaded usage contract.
unsafe impl Send for PoolEntry {}

/// The registered allocator-interface of one growing pool.
pub struct PoolRegistry {
    entry: Mutex<Option<PoolEntry>>,
}

impl PoolRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    /// Register `pool` with its resolver table.
    ///
    /// Fails with [`PoolError::AlreadyRegistered`] if another pool holds
    /// the cell.
    ///
    /// # Safety
    ///
    /// `pool` must stay valid (alive, at the same address) until it is
    /// unregistered, and `vtable`'s functions must accept it.
    pub unsafe fn register(&self, pool: NonNull<()>, vtable: PoolVtable) -> PoolResult {
        let mut entry = self.entry.lock();
        if entry.is_some() {
            log::debug!("pool registry: tag already occupied");
            return Err(PoolError::AlreadyRegistered);
        }
        *entry = Some(PoolEntry { pool, vtable });
        log::trace!("pool registry: registered {:p}", pool.as_ptr());
        Ok(())
    }

    /// Clear the cell, but only if it still holds `pool`.
    pub fn unregister(&self, pool: NonNull<()>) {
        let mut entry = self.entry.lock();
        if entry.as_ref().map(|e| e.pool) == Some(pool) {
            *entry = None;
            log::trace!("pool registry: unregistered {:p}", pool.as_ptr());
        }
    }

    /// Whether a pool is currently registered.
    pub fn is_registered(&self) -> bool {
        self.entry.lock().is_some()
    }

    fn entry(&self) -> PoolResult<(NonNull<()>, PoolVtable)> {
        self.entry
            .lock()
            .as_ref()
            .map(|e| (e.pool, e.vtable))
            .ok_or(PoolError::NotRegistered)
    }

    /// The base address of `segment_id` in `manager_id` of the registered
    /// pool.
    pub fn get_segment_base(&self, manager_id: usize, segment_id: usize) -> PoolResult<NonNull<u8>> {
        let (pool, vtable) = self.entry()?;
        // Safety: `register`'s contract keeps `pool` valid for `vtable`.
        unsafe { (vtable.get_segment_base)(pool.as_ptr(), manager_id, segment_id) }
    }

    /// The id of the manager whose segments contain `ptr`.
    pub fn find_manager_for_pointer(&self, ptr: NonNull<u8>) -> PoolResult<usize> {
        let (pool, vtable) = self.entry()?;
        // Safety: as above.
        unsafe { (vtable.find_manager_for_pointer)(pool.as_ptr(), ptr) }
    }

    /// The id of the segment inside `manager_id` that contains `ptr`.
    pub fn find_segment_in_manager(&self, manager_id: usize, ptr: NonNull<u8>) -> PoolResult<usize> {
        let (pool, vtable) = self.entry()?;
        // Safety: as above.
        unsafe { (vtable.find_segment_in_manager)(pool.as_ptr(), manager_id, ptr) }
    }

    /// The index of `ptr` within `segment_id`, in units of `elem_size`.
    pub fn compute_offset_in_segment(
        &self,
        manager_id: usize,
        segment_id: usize,
        ptr: NonNull<u8>,
        elem_size: usize,
    ) -> PoolResult<usize> {
        let (pool, vtable) = self.entry()?;
        // Safety: as above.
        unsafe { (vtable.compute_offset_in_segment)(pool.as_ptr(), manager_id, segment_id, ptr, elem_size) }
    }
}
