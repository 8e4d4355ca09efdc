//! Cross-component scenarios exercising the allocator stack end to end.
use blockpool::{
    define_pool_tag, BlockAllocator, GrowingPool, LocalBuffer, PoolError, PoolPointer, SegPtr,
};

define_pool_tag!(CycleTag);
define_pool_tag!(SpillSlabTag);
define_pool_tag!(SpillPoolTag);
define_pool_tag!(IsoSlabTag1);
define_pool_tag!(IsoSlabTag2);
define_pool_tag!(IsoPoolTag1);
define_pool_tag!(IsoPoolTag2);
define_pool_tag!(UnderflowTag);
define_pool_tag!(OverflowTag);
define_pool_tag!(DoubleSlabTag);
define_pool_tag!(DoublePoolTag);
define_pool_tag!(OrderSlabTag);
define_pool_tag!(OrderPoolTag);

/// Scenario A: a single local buffer runs a full-empty cycle.
#[test]
fn local_buffer_full_empty_cycle() {
    let buffer: LocalBuffer<u8, CycleTag, 64, 4> = LocalBuffer::new();

    let mut held = Vec::new();
    for _ in 0..4 {
        let ptr = buffer.allocate_block().unwrap();
        assert!(!ptr.is_null());
        assert!(!held.contains(&ptr));
        held.push(ptr);
    }
    assert_eq!(buffer.allocate_block().unwrap_err(), PoolError::OutOfMemory);

    for ptr in held {
        buffer.deallocate_block(ptr).unwrap();
    }
    assert!(buffer.allocate_block().is_ok());
}

/// Scenario B: a growing pool spills allocations across segments.
#[test]
fn growing_pool_segment_spill() {
    let slab: LocalBuffer<u8, SpillSlabTag, 2048, 16> = LocalBuffer::new();
    let pool: GrowingPool<'_, _, u16, SpillPoolTag, 256, 8, 4, 4> = GrowingPool::new(&slab);
    // Safety: both stay in place for the whole test; `Drop` unregisters.
    unsafe {
        slab.register().unwrap();
        pool.register().unwrap();
    }

    let before = pool.available();
    let ptrs: Vec<_> = (0..10).map(|_| pool.allocate_block().unwrap()).collect();

    // Ten blocks cannot share one eight-block segment.
    let first = ptrs[0].segment_id();
    assert!(
        ptrs.iter().any(|p| p.segment_id() != first),
        "all ten allocations landed in segment {}",
        first
    );

    for ptr in ptrs {
        pool.deallocate_block(ptr).unwrap();
    }
    assert_eq!(pool.available(), before);
}

/// Scenario D: a raw pointer converts to null through a sibling pool's
/// pointer type and round-trips through its own.
#[test]
fn cross_pool_conversion_is_null() {
    let slab1: LocalBuffer<u8, IsoSlabTag1, 2048, 16> = LocalBuffer::new();
    let slab2: LocalBuffer<u8, IsoSlabTag2, 2048, 16> = LocalBuffer::new();
    let pool1: GrowingPool<'_, _, u16, IsoPoolTag1, 256, 8, 4, 4> = GrowingPool::new(&slab1);
    let pool2: GrowingPool<'_, _, u16, IsoPoolTag2, 256, 8, 4, 4> = GrowingPool::new(&slab2);
    // Safety: as above.
    unsafe {
        slab1.register().unwrap();
        slab2.register().unwrap();
        pool1.register().unwrap();
        pool2.register().unwrap();
    }

    let p1 = pool1.allocate_block().unwrap();
    let p2 = pool2.allocate_block().unwrap();
    let raw1 = p1.to_raw();
    let raw2 = p2.to_raw();

    // Ownership is disjoint, so converting a foreign address yields
    // null, silently.
    type Ptr1 = SegPtr<u8, u16, IsoPoolTag1, 256, 8, 4, 4>;
    type Ptr2 = SegPtr<u8, u16, IsoPoolTag2, 256, 8, 4, 4>;
    assert!(Ptr2::from_raw(raw1).is_null());
    assert!(Ptr1::from_raw(raw2).is_null());

    // Converting the owner's address recovers the original pointer.
    let back = Ptr1::from_raw(raw1);
    assert_eq!(back, p1);
    assert_eq!(back.to_raw(), raw1);

    pool1.deallocate_block(p1).unwrap();
    pool2.deallocate_block(p2).unwrap();
}

/// Scenario E: pointer arithmetic beyond the pool is fatal.
mod arithmetic_bounds {
    use super::*;

    // Two blocks per segment, two segments, two managers.
    type TinyPtr = SegPtr<u8, u16, UnderflowTag, 64, 2, 2, 2>;
    type TinyPtrOver = SegPtr<u8, u16, OverflowTag, 64, 2, 2, 2>;

    #[test]
    #[should_panic(expected = "underflow")]
    fn decrement_from_pool_start() {
        let _ = TinyPtr::new(0, 0, 0).sub(1);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn increment_by_max_block_count() {
        // max_block_count = 2 managers x 2 segments x 2 blocks.
        let _ = TinyPtrOver::new(0, 0, 0).add(8);
    }

    #[test]
    fn add_sub_is_a_bijection_inside_the_range() {
        let p = TinyPtr::new(0, 0, 0);
        for n in 0..8 {
            assert_eq!(p.add(n).sub(n), p);
        }
    }
}

/// Scenario F: a second pool on the same tag is refused, recoverably.
#[test]
fn duplicate_registration_is_refused() {
    let slab: LocalBuffer<u8, DoubleSlabTag, 2048, 16> = LocalBuffer::new();
    let pool_a: GrowingPool<'_, _, u16, DoublePoolTag, 256, 8, 4, 4> = GrowingPool::new(&slab);
    let pool_b: GrowingPool<'_, _, u16, DoublePoolTag, 256, 8, 4, 4> = GrowingPool::new(&slab);

    // Safety: as above.
    unsafe {
        slab.register().unwrap();
        pool_a.register().unwrap();
        // The second registration fails without crashing...
        assert_eq!(pool_b.register().unwrap_err(), PoolError::AlreadyRegistered);
    }

    // ...and the first pool keeps working.
    let ptr = pool_a.allocate_block().unwrap();
    pool_a.deallocate_block(ptr).unwrap();
}

/// Property: ordering is total on non-null pointers and null sorts first.
#[test]
fn segmented_pointer_order_is_total() {
    let slab: LocalBuffer<u8, OrderSlabTag, 2048, 16> = LocalBuffer::new();
    let pool: GrowingPool<'_, _, u16, OrderPoolTag, 256, 8, 4, 4> = GrowingPool::new(&slab);
    // Safety: as above.
    unsafe {
        slab.register().unwrap();
        pool.register().unwrap();
    }

    let mut ptrs: Vec<_> = (0..20).map(|_| pool.allocate_block().unwrap()).collect();
    let null = SegPtr::<u8, u16, OrderPoolTag, 256, 8, 4, 4>::null();

    for &a in &ptrs {
        assert!(null < a);
        for &b in &ptrs {
            let relations = [a < b, a == b, a > b];
            assert_eq!(relations.iter().filter(|&&r| r).count(), 1);
        }
    }

    // Sorting brings the triples into lexicographic order.
    ptrs.sort();
    for pair in ptrs.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(
            (a.manager_id(), a.segment_id(), a.offset())
                < (b.manager_id(), b.segment_id(), b.offset())
        );
    }

    for ptr in ptrs {
        pool.deallocate_block(ptr).unwrap();
    }
}
