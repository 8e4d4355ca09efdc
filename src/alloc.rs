//! The homogeneous-allocator contract consumed by the containers.
use core::ptr::NonNull;

use crate::{error::PoolResult, ptr::PoolPointer};

/// A uniform-block allocator.
///
/// Every allocation is exactly one block of [`BLOCK_SIZE`] bytes, addressed
/// by the allocator's compact [`Pointer`] type. Methods take `&self`; the
/// implementations use interior mutability and are therefore `!Sync`,
/// matching the single-threaded model of this crate.
///
/// [`BLOCK_SIZE`]: Self::BLOCK_SIZE
/// [`Pointer`]: Self::Pointer
pub trait BlockAllocator {
    /// The compact pointer type handed out by this allocator.
    type Pointer: PoolPointer;

    /// The size of every block in bytes. Always a power of two.
    const BLOCK_SIZE: usize;
    /// The alignment every block is guaranteed to have.
    const BLOCK_ALIGN: usize;
    /// The maximum number of blocks this allocator can have outstanding.
    const MAX_BLOCK_COUNT: usize;
    /// `BLOCK_SIZE * MAX_BLOCK_COUNT`.
    const TOTAL_SIZE: usize;

    /// Allocate one block.
    fn allocate_block(&self) -> PoolResult<Self::Pointer>;

    /// Return one block.
    fn deallocate_block(&self, ptr: Self::Pointer) -> PoolResult;

    /// Drop every outstanding allocation and return to the initial state.
    ///
    /// The caller is responsible for ensuring no live references into the
    /// allocator's storage remain.
    fn reset(&self);

    /// The number of blocks currently available without growing.
    fn available(&self) -> usize;
}

/// A type-erased byte-level memory resource, used as the upstream fallback
/// of the general-purpose facade on [`LocalBuffer`](crate::LocalBuffer).
///
/// This is the seam through which requests that do not fit a block are
/// forwarded to some larger allocator.
pub trait RawResource {
    /// Allocate `size` bytes aligned to `align`.
    ///
    /// # Safety
    ///
    /// `size` must be non-zero and `align` a power of two.
    unsafe fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Return an allocation previously obtained from [`allocate`] on the
    /// same resource with the same `size` and `align`.
    ///
    /// # Safety
    ///
    /// `ptr` must denote such an allocation, which must not be used again.
    ///
    /// [`allocate`]: Self::allocate
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);
}
