//! The segmented pointer: a bit-packed `(manager, segment, offset)` triple.
use core::{cmp::Ordering, fmt, marker::PhantomData, ptr::NonNull};

use crate::{
    int::{bit_width, BinInteger},
    ptr::{registry::PoolTag, PoolPointer},
};

/// A compact handle into the [`GrowingPool`] registered for `Tag`.
///
/// The three fields are packed LSB-to-MSB as `offset | segment | manager`
/// into the backing word `R`, whose width is validated against the field
/// widths at compile time. The manager field reserves its all-ones value as
/// the null sentinel; every `MAX_MANAGERS` id stays below it.
///
/// Resolution is indirect: the pointer only names its tag, and the tag's
/// registry holds the allocator-interface that turns the triple into an
/// address. Constructing a segmented pointer from a raw address the
/// registered pool does not own yields a *null* pointer; this is how two
/// pools tell their allocations apart, not an error.
///
/// `P` is the pointee as seen through [`as_ptr`](Self::as_ptr); blocks hold
/// one `P` each, so arithmetic advances whole blocks across segment and
/// manager boundaries. Null sorts before every valid pointer.
///
/// [`GrowingPool`]: crate::GrowingPool
pub struct SegPtr<
    P,
    R,
    Tag,
    const BLOCK_SIZE: usize,
    const BLOCKS_PER_SEGMENT: usize,
    const MAX_SEGMENTS: usize,
    const MAX_MANAGERS: usize,
> {
    bits: R,
    _marker: PhantomData<(fn() -> P, fn() -> Tag)>,
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const BLOCK_SIZE: usize,
        const BLOCKS_PER_SEGMENT: usize,
        const MAX_SEGMENTS: usize,
        const MAX_MANAGERS: usize,
    > SegPtr<P, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>
{
    /// The width of the offset field.
    pub const OFFSET_BITS: u32 = bit_width(BLOCKS_PER_SEGMENT - 1);
    /// The width of the segment field.
    pub const SEGMENT_BITS: u32 = bit_width(MAX_SEGMENTS - 1);
    /// The width of the manager field; sized for `MAX_MANAGERS` ids *plus*
    /// the null sentinel.
    pub const MANAGER_BITS: u32 = bit_width(MAX_MANAGERS);
    /// The total number of bits used in `R`.
    pub const TOTAL_BITS: u32 = Self::OFFSET_BITS + Self::SEGMENT_BITS + Self::MANAGER_BITS;

    /// The reserved all-ones manager value encoding null.
    pub const NULL_MANAGER: usize = (1 << Self::MANAGER_BITS) - 1;
    /// The largest encodable offset.
    pub const MAX_OFFSET_INDEX: usize = (1 << Self::OFFSET_BITS) - 1;
    /// The largest encodable segment id.
    pub const MAX_SEGMENT_INDEX: usize = (1 << Self::SEGMENT_BITS) - 1;
    /// The largest encodable manager id.
    pub const MAX_MANAGER_INDEX: usize = Self::NULL_MANAGER - 1;

    const BLOCKS_PER_MANAGER: usize = BLOCKS_PER_SEGMENT * MAX_SEGMENTS;
    /// The linear capacity arithmetic is allowed to span.
    const TOTAL_BLOCKS: usize = MAX_MANAGERS * Self::BLOCKS_PER_MANAGER;

    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        assert!(BLOCK_SIZE.is_power_of_two(), "`BLOCK_SIZE` must be a power of two");
        assert!(Self::OFFSET_BITS > 0, "`OFFSET_BITS` must be at least 1");
        assert!(Self::SEGMENT_BITS > 0, "`SEGMENT_BITS` must be at least 1");
        assert!(Self::MANAGER_BITS > 0, "`MANAGER_BITS` must be at least 1");
        assert!(
            Self::TOTAL_BITS <= R::BITS,
            "`R` cannot hold the packed triple"
        );
        assert!(
            Self::TOTAL_BITS <= usize::BITS,
            "the packed triple exceeds the native word"
        );
        assert!(
            MAX_MANAGERS <= Self::NULL_MANAGER,
            "every manager id must stay below the null sentinel"
        );
        assert!(
            core::mem::size_of::<P>() <= BLOCK_SIZE,
            "the pointee must fit in one block"
        );
    };

    /// The null pointer.
    #[inline]
    pub fn null() -> Self {
        let () = Self::VALID;
        Self {
            bits: R::from_usize(Self::NULL_MANAGER << (Self::OFFSET_BITS + Self::SEGMENT_BITS)),
            _marker: PhantomData,
        }
    }

    /// A pointer to block `offset` of segment `segment_id` of manager
    /// `manager_id`.
    ///
    /// # Panics
    ///
    /// Panics if any field is out of range; the allocator never emits such
    /// a triple, so receiving one means the caller fabricated it.
    pub fn new(manager_id: usize, segment_id: usize, offset: usize) -> Self {
        let () = Self::VALID;
        assert!(
            manager_id <= Self::MAX_MANAGER_INDEX,
            "manager id out of range or null"
        );
        assert!(segment_id <= Self::MAX_SEGMENT_INDEX, "segment id out of range");
        assert!(offset <= Self::MAX_OFFSET_INDEX, "offset out of range");
        let bits = offset
            | (segment_id << Self::OFFSET_BITS)
            | (manager_id << (Self::OFFSET_BITS + Self::SEGMENT_BITS));
        Self {
            bits: R::from_usize(bits),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn field(self, shift: u32, bits: u32) -> usize {
        (self.bits.as_usize() >> shift) & ((1 << bits) - 1)
    }

    #[inline]
    fn manager_field(self) -> usize {
        self.field(Self::OFFSET_BITS + Self::SEGMENT_BITS, Self::MANAGER_BITS)
    }

    /// Whether this is the null pointer.
    #[inline]
    pub fn is_null(self) -> bool {
        self.manager_field() == Self::NULL_MANAGER
    }

    /// The manager id.
    ///
    /// # Panics
    ///
    /// Panics on null.
    #[inline]
    pub fn manager_id(self) -> usize {
        assert!(!self.is_null(), "cannot read the manager id of a null pointer");
        self.manager_field()
    }

    /// The segment id.
    ///
    /// # Panics
    ///
    /// Panics on null.
    #[inline]
    pub fn segment_id(self) -> usize {
        assert!(!self.is_null(), "cannot read the segment id of a null pointer");
        self.field(Self::OFFSET_BITS, Self::SEGMENT_BITS)
    }

    /// The in-segment block offset.
    ///
    /// # Panics
    ///
    /// Panics on null.
    #[inline]
    pub fn offset(self) -> usize {
        assert!(!self.is_null(), "cannot read the offset of a null pointer");
        self.field(0, Self::OFFSET_BITS)
    }

    /// Resolve to a raw pointer through the tag's registered pool.
    ///
    /// Null resolves to a null raw pointer, and so does any lookup the
    /// registry cannot complete (no pool registered, segment since
    /// released).
    pub fn as_ptr(self) -> *mut P {
        if self.is_null() {
            return core::ptr::null_mut();
        }
        match Tag::registry().get_segment_base(self.manager_id(), self.segment_id()) {
            Ok(base) => base.as_ptr().wrapping_add(self.offset() * BLOCK_SIZE).cast(),
            Err(_) => core::ptr::null_mut(),
        }
    }

    /// A shared reference to the pointee.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is null or cannot be resolved.
    ///
    /// # Safety
    ///
    /// The block must currently hold a live `P` and the usual aliasing
    /// rules apply for the duration of `'a`.
    #[inline]
    pub unsafe fn as_ref<'a>(self) -> &'a P {
        assert!(!self.is_null(), "dereferenced a null segmented pointer");
        let ptr = self.as_ptr();
        assert!(!ptr.is_null(), "dereferenced an unresolvable segmented pointer");
        &*ptr
    }

    /// An exclusive reference to the pointee.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is null or cannot be resolved.
    ///
    /// # Safety
    ///
    /// As [`as_ref`](Self::as_ref), plus exclusivity.
    #[inline]
    pub unsafe fn as_mut<'a>(self) -> &'a mut P {
        assert!(!self.is_null(), "dereferenced a null segmented pointer");
        let ptr = self.as_ptr();
        assert!(!ptr.is_null(), "dereferenced an unresolvable segmented pointer");
        &mut *ptr
    }

    /// Reconstruct a segmented pointer from a raw pointer.
    ///
    /// The registered pool is asked which of its managers and segments own
    /// the address; if any step reports that the address is not owned (or
    /// no pool is registered), the result is silently null. Sibling pools
    /// rely on this to recognize each other's pointers.
    pub fn from_ptr(raw: *mut P) -> Self {
        let Some(ptr) = NonNull::new(raw.cast::<u8>()) else {
            return Self::null();
        };
        let registry = Tag::registry();
        let Ok(manager_id) = registry.find_manager_for_pointer(ptr) else {
            return Self::null();
        };
        let Ok(segment_id) = registry.find_segment_in_manager(manager_id, ptr) else {
            return Self::null();
        };
        let Ok(offset) = registry.compute_offset_in_segment(manager_id, segment_id, ptr, BLOCK_SIZE)
        else {
            return Self::null();
        };
        Self::new(manager_id, segment_id, offset)
    }

    /// Rebind to another pointee, preserving the bit pattern and the tag.
    #[inline]
    pub fn cast<U>(self) -> SegPtr<U, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS> {
        SegPtr {
            bits: self.bits,
            _marker: PhantomData,
        }
    }

    /// The linear block position across the whole pool.
    fn linear(self) -> usize {
        self.manager_id() * Self::BLOCKS_PER_MANAGER
            + self.segment_id() * BLOCKS_PER_SEGMENT
            + self.offset()
    }

    fn from_linear(linear: usize) -> Self {
        debug_assert!(linear < Self::TOTAL_BLOCKS);
        let manager = linear / Self::BLOCKS_PER_MANAGER;
        let within = linear % Self::BLOCKS_PER_MANAGER;
        Self::new(manager, within / BLOCKS_PER_SEGMENT, within % BLOCKS_PER_SEGMENT)
    }

    /// The pointer `count` blocks after this one, crossing segment and
    /// manager boundaries as needed.
    ///
    /// Null is returned unchanged.
    ///
    /// # Panics
    ///
    /// Panics when the new position lies beyond the pool's linear
    /// capacity.
    pub fn add(self, count: usize) -> Self {
        if self.is_null() {
            return self;
        }
        let linear = match self.linear().checked_add(count) {
            Some(x) if x < Self::TOTAL_BLOCKS => x,
            _ => panic!("pointer arithmetic overflow - beyond end of pool"),
        };
        Self::from_linear(linear)
    }

    /// The pointer `count` blocks before this one.
    ///
    /// Null is returned unchanged.
    ///
    /// # Panics
    ///
    /// Panics when the new position would lie before the start of the
    /// pool.
    pub fn sub(self, count: usize) -> Self {
        if self.is_null() {
            return self;
        }
        let linear = match self.linear().checked_sub(count) {
            Some(x) => x,
            None => panic!("pointer arithmetic underflow - before start of pool"),
        };
        Self::from_linear(linear)
    }

    /// The key realizing the documented order: null first, then
    /// lexicographic on `(manager, segment, offset)`.
    fn sort_key(self) -> (bool, usize) {
        if self.is_null() {
            (false, 0)
        } else {
            (true, self.linear())
        }
    }
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const BLOCK_SIZE: usize,
        const BLOCKS_PER_SEGMENT: usize,
        const MAX_SEGMENTS: usize,
        const MAX_MANAGERS: usize,
    > PoolPointer for SegPtr<P, R, Tag, BLOCK_SIZE, BLOCKS_PER_SEGMENT, MAX_SEGMENTS, MAX_MANAGERS>
{
    #[inline]
    fn null() -> Self {
        Self::null()
    }

    #[inline]
    fn is_null(self) -> bool {
        self.is_null()
    }

    #[inline]
    fn to_raw(self) -> *mut u8 {
        self.as_ptr().cast()
    }

    #[inline]
    fn from_raw(raw: *mut u8) -> Self {
        Self::from_ptr(raw.cast())
    }
}

impl<P, R: Copy, Tag, const A: usize, const B: usize, const C: usize, const D: usize> Clone
    for SegPtr<P, R, Tag, A, B, C, D>
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, R: Copy, Tag, const A: usize, const B: usize, const C: usize, const D: usize> Copy
    for SegPtr<P, R, Tag, A, B, C, D>
{
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > PartialEq for SegPtr<P, R, Tag, A, B, C, D>
{
    fn eq(&self, other: &Self) -> bool {
        // All null encodings compare equal regardless of the dead fields.
        self.sort_key() == other.sort_key()
    }
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > Eq for SegPtr<P, R, Tag, A, B, C, D>
{
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > PartialOrd for SegPtr<P, R, Tag, A, B, C, D>
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > Ord for SegPtr<P, R, Tag, A, B, C, D>
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > fmt::Debug for SegPtr<P, R, Tag, A, B, C, D>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("SegPtr(null)")
        } else {
            write!(
                f,
                "SegPtr({}:{}:{})",
                self.manager_id(),
                self.segment_id(),
                self.offset()
            )
        }
    }
}

impl<
        P,
        R: BinInteger,
        Tag: PoolTag,
        const A: usize,
        const B: usize,
        const C: usize,
        const D: usize,
    > Default for SegPtr<P, R, Tag, A, B, C, D>
{
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests;
