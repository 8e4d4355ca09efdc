extern crate std;

use std::prelude::v1::*;

use super::*;

crate::define_pool_tag!(LayoutTag);
crate::define_pool_tag!(TinyTag);

// 8 blocks per segment, 4 segments, 3 managers.
type Ptr = SegPtr<u8, u16, LayoutTag, 64, 8, 4, 3>;
// The two-blocks-per-segment shape used by the arithmetic fatal tests.
type TinyPtr = SegPtr<u8, u16, TinyTag, 64, 2, 2, 2>;

#[test]
fn bit_layout() {
    assert_eq!(Ptr::OFFSET_BITS, 3);
    assert_eq!(Ptr::SEGMENT_BITS, 2);
    // Manager ids plus the null sentinel.
    assert_eq!(Ptr::MANAGER_BITS, 2);
    assert_eq!(Ptr::TOTAL_BITS, 7);
    assert_eq!(Ptr::NULL_MANAGER, 3);
    assert_eq!(Ptr::MAX_MANAGER_INDEX, 2);
    assert_eq!(Ptr::MAX_SEGMENT_INDEX, 3);
    assert_eq!(Ptr::MAX_OFFSET_INDEX, 7);
}

#[test]
fn triple_round_trips() {
    for manager in 0..3 {
        for segment in 0..4 {
            for offset in 0..8 {
                let ptr = Ptr::new(manager, segment, offset);
                assert!(!ptr.is_null());
                assert_eq!(ptr.manager_id(), manager);
                assert_eq!(ptr.segment_id(), segment);
                assert_eq!(ptr.offset(), offset);
            }
        }
    }
}

#[test]
fn null_properties() {
    let null = Ptr::null();
    assert!(null.is_null());
    assert!(null.as_ptr().is_null());
    assert_eq!(null, Ptr::default());
}

#[test]
fn from_ptr_without_pool_is_null() {
    let mut byte = 0u8;
    let ptr = Ptr::from_ptr(&mut byte);
    assert!(ptr.is_null());
}

#[test]
fn resolution_without_pool_is_null() {
    // A non-null pointer whose registry cell is empty resolves to null
    // rather than crashing; the triple may simply have outlived its pool.
    let ptr = Ptr::new(1, 2, 3);
    assert!(ptr.as_ptr().is_null());
}

#[test]
fn ordering_is_total_with_null_first() {
    let null = Ptr::null();
    let a = Ptr::new(0, 0, 0);
    let b = Ptr::new(0, 0, 7);
    let c = Ptr::new(0, 3, 0);
    let d = Ptr::new(2, 0, 0);
    assert!(null < a);
    assert!(a < b);
    assert!(b < c);
    assert!(c < d);

    let mut sorted = [d, null, c, a, b];
    sorted.sort();
    assert_eq!(sorted, [null, a, b, c, d]);

    // Exactly one of <, ==, > holds for every non-null pair.
    let all = [a, b, c, d];
    for x in all {
        for y in all {
            let relations = [x < y, x == y, x > y];
            assert_eq!(relations.iter().filter(|&&r| r).count(), 1);
        }
    }
}

#[test]
fn cast_preserves_bits() {
    let ptr = Ptr::new(2, 1, 5);
    let cast: SegPtr<[u8; 64], u16, LayoutTag, 64, 8, 4, 3> = ptr.cast();
    let back: Ptr = cast.cast();
    assert_eq!(back.manager_id(), 2);
    assert_eq!(back.segment_id(), 1);
    assert_eq!(back.offset(), 5);
}

#[test]
fn arithmetic_crosses_segments_and_managers() {
    let p = TinyPtr::new(0, 0, 0);
    // Two blocks per segment, two segments per manager.
    assert_eq!(p.add(1), TinyPtr::new(0, 0, 1));
    assert_eq!(p.add(2), TinyPtr::new(0, 1, 0));
    assert_eq!(p.add(4), TinyPtr::new(1, 0, 0));
    assert_eq!(p.add(7), TinyPtr::new(1, 1, 1));
    // Bijection: adding then subtracting is the identity inside the range.
    assert_eq!(p.add(7).sub(7), p);
    assert_eq!(p.add(5).sub(2), p.add(3));
}

#[test]
fn null_arithmetic_is_inert() {
    let null = TinyPtr::null();
    assert!(null.add(3).is_null());
    assert!(null.sub(3).is_null());
}

#[test]
#[should_panic(expected = "underflow")]
fn decrement_below_pool_start_is_fatal() {
    let _ = TinyPtr::new(0, 0, 0).sub(1);
}

#[test]
#[should_panic(expected = "overflow")]
fn increment_beyond_pool_capacity_is_fatal() {
    // The linear capacity is 2 managers x 2 segments x 2 blocks.
    let _ = TinyPtr::new(0, 0, 0).add(8);
}

#[test]
#[should_panic(expected = "manager id out of range")]
fn manager_out_of_range_is_fatal() {
    // Manager 3 is the null sentinel of this layout.
    let _ = Ptr::new(3, 0, 0);
}

#[test]
#[should_panic(expected = "segment id out of range")]
fn segment_out_of_range_is_fatal() {
    let _ = Ptr::new(0, 4, 0);
}

#[test]
#[should_panic(expected = "offset out of range")]
fn offset_out_of_range_is_fatal() {
    let _ = Ptr::new(0, 0, 8);
}

#[test]
#[should_panic(expected = "cannot read the manager id")]
fn manager_id_of_null_is_fatal() {
    let _ = Ptr::null().manager_id();
}
