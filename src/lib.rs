//! This crate implements a composable memory-allocation stack that operates
//! entirely inside caller-supplied fixed backing regions; no calls to a host
//! heap are ever made.
//!
//!  - **Fixed-size pools are composed out of a small number of large slabs.**
//!    A [`LocalBuffer`] serves uniform blocks out of a single fixed slab, and
//!    a [`GrowingPool`] subdivides blocks drawn from an upstream allocator
//!    into smaller ones, growing on demand up to a compile-time limit.
//!
//!  - **Allocations are addressed by compact "fancy pointers".** A
//!    [`ThinPtr`] stores a block offset sized to the pool it came from
//!    (often a single byte); a [`SegPtr`] bit-packs a
//!    `(manager, segment, offset)` triple into the smallest integer that
//!    fits. Raw-pointer round trips go through a process-wide registry keyed
//!    by a compile-time tag type (see [`define_pool_tag`]).
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications. All state lives inline or in statics; the
//!    only shared state is the per-tag pointer registry.
//!
//! Higher-level structures are built on the same allocator contract: an
//! allocator-backed singly-linked list ([`OffsetList`]), a fixed-capacity
//! ring buffer ([`RingBuffer`]) occupying exactly one block, a FIFO
//! [`Queue`] of ring buffers, and a handle-based byte queue exposed to C
//! ([`c_api`]).
//!
//! # Examples
//!
//! ```rust
//! use blockpool::{define_pool_tag, BlockAllocator, GrowingPool, LocalBuffer};
//!
//! define_pool_tag!(SlabTag);
//! define_pool_tag!(PoolTag256);
//!
//! // 16 slabs of 2048 bytes each, addressed by thin pointers.
//! let slab: LocalBuffer<u16, SlabTag, 2048, 16> = LocalBuffer::new();
//! // A pool of 256-byte blocks carved out of the slabs: 8 blocks per
//! // segment, up to 15 segments per manager, up to 4 managers.
//! let pool: GrowingPool<'_, _, u16, PoolTag256, 256, 8, 15, 4> =
//!     GrowingPool::new(&slab);
//! // Safety: neither allocator moves nor drops while registered; `Drop`
//! // unregisters them in reverse order.
//! unsafe {
//!     slab.register().unwrap();
//!     pool.register().unwrap();
//! }
//!
//! let ptr = pool.allocate_block().unwrap();
//! assert!(!ptr.is_null());
//! pool.deallocate_block(ptr).unwrap();
//! ```
//!
//! # Details
//!
//! ## Failure discipline
//!
//! Every public allocator and pointer-conversion operation returns
//! [`PoolResult`], carrying a [`PoolError`] kind that callers may legitimately
//! react to (an exhausted freelist makes a growing pool open a new segment; a
//! `NotOwned` lookup is how two sibling pools tell their pointers apart).
//! Panics are reserved for contract violations that cannot occur in a correct
//! program: dereferencing null, constructing a packed pointer from an
//! out-of-range triple, pointer arithmetic leaving the pool, or a block
//! address that is not on a block boundary of its own storage.
//!
//! ## Concurrency
//!
//! The allocators are single-threaded by design and use interior mutability
//! (`Cell`), so they are `!Sync`. The C API serializes itself with a spin
//! lock and asserts the single-threaded contract at its boundary.
#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod alloc;
pub mod buffer;
pub mod c_api;
pub mod error;
pub mod freelist;
pub mod int;
pub mod list;
pub mod pool;
pub mod ptr;
pub mod queue;
pub mod ring;
pub mod segment;
pub mod slist;

pub use self::{
    alloc::{BlockAllocator, RawResource},
    buffer::LocalBuffer,
    error::{PoolError, PoolResult},
    list::OffsetList,
    pool::GrowingPool,
    ptr::{registry::PoolTag, seg::SegPtr, thin::ThinPtr, PoolPointer},
    queue::Queue,
    ring::RingBuffer,
};

/// The maximum alignment the inline slab storage guarantees for block 0.
///
/// Blocks within a slab are laid out at multiples of the block size from the
/// slab base, so a block's *effective* alignment is
/// `min(block_size, MAX_SLAB_ALIGN)`.
pub const MAX_SLAB_ALIGN: usize = 64;

/// `min(block_size, MAX_SLAB_ALIGN)`, the alignment an allocator with the
/// given block size can guarantee.
pub(crate) const fn effective_block_align(block_size: usize) -> usize {
    if block_size < MAX_SLAB_ALIGN {
        block_size
    } else {
        MAX_SLAB_ALIGN
    }
}
