//! Unsigned integer support for offset links and packed pointer storage.
use core::{fmt, hash::Hash, ops};

/// An unsigned integer type usable as freelist offset storage or as the
/// backing word of a packed pointer.
///
/// The maximum value doubles as the null sentinel everywhere in this crate,
/// so a list of `n` blocks needs a type with at least `n + 1` distinct
/// values.
pub trait BinInteger:
    Copy
    + Clone
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Hash
    + fmt::Debug
    + ops::BitOr<Output = Self>
    + ops::BitAnd<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// The zero value.
    const ZERO: Self;
    /// The all-ones value, reserved as the null sentinel.
    const MAX: Self;
    /// The width of this type in bits.
    const BITS: u32;

    /// Convert from `usize`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not fit; a narrowing overflow here always
    /// indicates a bug in the caller's size arithmetic.
    fn from_usize(value: usize) -> Self;

    /// Widen to `usize`.
    fn as_usize(self) -> usize;
}

macro_rules! impl_bin_integer {
    ($($ty:ty),*$(,)*) => {$(
        impl BinInteger for $ty {
            const ZERO: Self = 0;
            const MAX: Self = <$ty>::MAX;
            const BITS: u32 = <$ty>::BITS;

            #[inline]
            fn from_usize(value: usize) -> Self {
                match <$ty>::try_from(value) {
                    Ok(x) => x,
                    Err(_) => panic!("narrowing overflow"),
                }
            }

            #[inline]
            fn as_usize(self) -> usize {
                self as usize
            }
        }
    )*};
}

impl_bin_integer!(u8, u16, u32, u64);

/// The number of bits needed to represent `value` (`⌈log₂(value + 1)⌉`).
#[inline]
pub const fn bit_width(value: usize) -> u32 {
    usize::BITS - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(3), 2);
        assert_eq!(bit_width(4), 3);
        assert_eq!(bit_width(7), 3);
        assert_eq!(bit_width(8), 4);
        assert_eq!(bit_width(255), 8);
        assert_eq!(bit_width(256), 9);
    }

    #[test]
    fn round_trips() {
        assert_eq!(u8::from_usize(200).as_usize(), 200);
        assert_eq!(u16::from_usize(65_535).as_usize(), 65_535);
        assert_eq!(u8::MAX.as_usize(), 255);
    }

    #[test]
    #[should_panic(expected = "narrowing overflow")]
    fn narrowing_overflow_is_fatal() {
        let _ = u8::from_usize(256);
    }
}
