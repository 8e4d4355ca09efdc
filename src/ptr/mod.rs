//! Compact "fancy pointer" types and the per-tag registry that resolves
//! them.
//!
//! A fancy pointer never owns anything; it is an index into some
//! allocator's storage, small enough that embedding it in a node costs a
//! few bits rather than a machine word. Two layouts are provided:
//!
//! - [`thin::ThinPtr`], a single block offset from one registered base
//!   address (one [`LocalBuffer`](crate::LocalBuffer));
//! - [`seg::SegPtr`], a bit-packed `(manager, segment, offset)` triple
//!   into a [`GrowingPool`](crate::GrowingPool).
//!
//! Raw-pointer round trips are resolved through [`registry`], keyed by a
//! compile-time tag type so that same-shape allocators stay isolated.
use core::fmt;

pub mod registry;
pub mod seg;
pub mod thin;

/// The pointer interface consumed by the containers.
///
/// `to_raw`/`from_raw` are the untyped round-trip conversions: `to_raw` is
/// null-safe (null resolves to a null raw pointer), and `from_raw` of an
/// address the allocator does not own yields the null value for pointer
/// layouts that can detect it (see the concrete types for the exact
/// semantics).
pub trait PoolPointer: Copy + Clone + PartialEq + Eq + PartialOrd + Ord + fmt::Debug {
    /// The null value.
    fn null() -> Self;

    /// Whether this is the null value.
    fn is_null(self) -> bool;

    /// Resolve to a raw byte address.
    fn to_raw(self) -> *mut u8;

    /// Reconstruct from a raw byte address.
    fn from_raw(raw: *mut u8) -> Self;
}
