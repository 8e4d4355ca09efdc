//! The thin pointer: one block offset from a single registered base.
use core::{cmp::Ordering, fmt, marker::PhantomData};

use crate::{
    int::BinInteger,
    ptr::{registry::PoolTag, PoolPointer},
};

/// An offset-based handle into the single [`LocalBuffer`] registered for
/// `Tag`.
///
/// The stored offset counts *blocks* from the buffer's base, so the handle
/// is as small as the offset type `O`: one byte for buffers of up to 255
/// blocks. The all-ones value of `O` is reserved as the null sentinel,
/// which makes null sort *after* every valid pointer.
///
/// `P` is the pointee as seen through [`as_ptr`](Self::as_ptr); blocks hold
/// one `P` each, so arithmetic advances whole blocks. Rebinding to another
/// pointee with [`cast`](Self::cast) preserves the offset and the tag.
///
/// [`LocalBuffer`]: crate::LocalBuffer
pub struct ThinPtr<P, O, Tag, const BLOCK_SIZE: usize> {
    offset: O,
    _marker: PhantomData<(fn() -> P, fn() -> Tag)>,
}

impl<P, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize> ThinPtr<P, O, Tag, BLOCK_SIZE> {
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        assert!(BLOCK_SIZE.is_power_of_two(), "`BLOCK_SIZE` must be a power of two");
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
            offset: O::MAX,
            _marker: PhantomData,
        }
    }

    /// A pointer to the block at `offset` (in blocks from the base).
    #[inline]
    pub(crate) fn from_offset(offset: O) -> Self {
        let () = Self::VALID;
        debug_assert!(offset != O::MAX);
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// The stored offset, in blocks. The null sentinel is `O::MAX`.
    #[inline]
    pub fn offset(self) -> O {
        self.offset
    }

    /// Whether this is the null pointer.
    #[inline]
    pub fn is_null(self) -> bool {
        self.offset == O::MAX
    }

    /// Resolve to a raw pointer through the tag's registered base.
    ///
    /// Null resolves to a null raw pointer.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is non-null and no base is registered for
    /// `Tag`.
    #[inline]
    pub fn as_ptr(self) -> *mut P {
        if self.is_null() {
            return core::ptr::null_mut();
        }
        let base = match Tag::thin_base().get() {
            Some(base) => base,
            None => panic!("no base address registered for this tag"),
        };
        base.as_ptr()
            .wrapping_add(self.offset.as_usize() * BLOCK_SIZE)
            .cast()
    }

    /// A shared reference to the pointee.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is null.
    ///
    /// # Safety
    ///
    /// The block must currently hold a live `P` and the usual aliasing
    /// rules apply for the duration of `'a`.
    #[inline]
    pub unsafe fn as_ref<'a>(self) -> &'a P {
        assert!(!self.is_null(), "dereferenced a null thin pointer");
        &*self.as_ptr()
    }

    /// An exclusive reference to the pointee.
    ///
    /// # Panics
    ///
    /// Panics if the pointer is null.
    ///
    /// # Safety
    ///
    /// As [`as_ref`](Self::as_ref), plus exclusivity.
    #[inline]
    pub unsafe fn as_mut<'a>(self) -> &'a mut P {
        assert!(!self.is_null(), "dereferenced a null thin pointer");
        &mut *self.as_ptr()
    }

    /// Reconstruct a thin pointer from a raw pointer.
    ///
    /// A null `raw` yields the null pointer, and so does any `raw` while no
    /// base is registered for `Tag` (the conversion has nothing to resolve
    /// against).
    ///
    /// # Panics
    ///
    /// Panics if `raw` lies before the registered base, is not on a block
    /// boundary, or its offset collides with the null sentinel.
    pub fn from_ptr(raw: *mut P) -> Self {
        let Some(raw) = core::ptr::NonNull::new(raw) else {
            return Self::null();
        };
        let Some(base) = Tag::thin_base().get() else {
            return Self::null();
        };
        let addr = raw.as_ptr() as usize;
        let base = base.as_ptr() as usize;
        assert!(addr >= base, "pointer is before the registered base");
        let byte_offset = addr - base;
        assert!(
            byte_offset % BLOCK_SIZE == 0,
            "pointer is not on a block boundary"
        );
        let offset = O::from_usize(byte_offset / BLOCK_SIZE);
        assert!(
            offset != O::MAX,
            "pointer offset collides with the null sentinel"
        );
        Self::from_offset(offset)
    }

    /// Rebind to another pointee, preserving the offset and the tag.
    #[inline]
    pub fn cast<U>(self) -> ThinPtr<U, O, Tag, BLOCK_SIZE> {
        ThinPtr {
            offset: self.offset,
            _marker: PhantomData,
        }
    }

    /// The pointer `count` blocks after this one.
    ///
    /// # Panics
    ///
    /// Panics on null, or if the new offset leaves the offset type's range
    /// or collides with the null sentinel.
    pub fn add(self, count: usize) -> Self {
        assert!(!self.is_null(), "arithmetic on a null thin pointer");
        let offset = match self.offset.as_usize().checked_add(count) {
            Some(x) => O::from_usize(x),
            None => panic!("thin pointer arithmetic overflow"),
        };
        assert!(
            offset != O::MAX,
            "pointer offset collides with the null sentinel"
        );
        Self::from_offset(offset)
    }

    /// The pointer `count` blocks before this one.
    ///
    /// # Panics
    ///
    /// Panics on null or if the new offset would be negative.
    pub fn sub(self, count: usize) -> Self {
        assert!(!self.is_null(), "arithmetic on a null thin pointer");
        let offset = match self.offset.as_usize().checked_sub(count) {
            Some(x) => O::from_usize(x),
            None => panic!("thin pointer arithmetic underflow"),
        };
        Self::from_offset(offset)
    }
}

impl<P, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize> PoolPointer
    for ThinPtr<P, O, Tag, BLOCK_SIZE>
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

// The derives would bound `P: Clone` etc., which the phantom parameter does
// not require.
impl<P, O: Copy, Tag, const BLOCK_SIZE: usize> Clone for ThinPtr<P, O, Tag, BLOCK_SIZE> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, O: Copy, Tag, const BLOCK_SIZE: usize> Copy for ThinPtr<P, O, Tag, BLOCK_SIZE> {}

impl<P, O: BinInteger, Tag, const BLOCK_SIZE: usize> PartialEq for ThinPtr<P, O, Tag, BLOCK_SIZE> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<P, O: BinInteger, Tag, const BLOCK_SIZE: usize> Eq for ThinPtr<P, O, Tag, BLOCK_SIZE> {}

impl<P, O: BinInteger, Tag, const BLOCK_SIZE: usize> PartialOrd for ThinPtr<P, O, Tag, BLOCK_SIZE> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Null is the sentinel `O::MAX`, so it sorts after every valid pointer.
impl<P, O: BinInteger, Tag, const BLOCK_SIZE: usize> Ord for ThinPtr<P, O, Tag, BLOCK_SIZE> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset.cmp(&other.offset)
    }
}

impl<P, O: BinInteger, Tag, const BLOCK_SIZE: usize> fmt::Debug for ThinPtr<P, O, Tag, BLOCK_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == O::MAX {
            f.write_str("ThinPtr(null)")
        } else {
            write!(f, "ThinPtr({:?})", self.offset)
        }
    }
}

impl<P, O: BinInteger, Tag: PoolTag, const BLOCK_SIZE: usize> Default
    for ThinPtr<P, O, Tag, BLOCK_SIZE>
{
    fn default() -> Self {
        Self::null()
    }
}
