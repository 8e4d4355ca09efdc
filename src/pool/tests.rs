extern crate std;

use quickcheck_macros::quickcheck;
use std::{collections::BTreeSet, prelude::v1::*};

use super::*;
use crate::{buffer::LocalBuffer, ptr::seg::SegPtr};

crate::define_pool_tag!(SpillSlabTag);
crate::define_pool_tag!(SpillPoolTag);
crate::define_pool_tag!(GrowSlabTag);
crate::define_pool_tag!(GrowPoolTag);
crate::define_pool_tag!(RoundSlabTag);
crate::define_pool_tag!(RoundPoolTag);
crate::define_pool_tag!(ResetSlabTag);
crate::define_pool_tag!(ResetPoolTag);
crate::define_pool_tag!(RandomSlabTag);
crate::define_pool_tag!(RandomPoolTag);

/// The shape used by most tests: a pool of 256-byte blocks over 2048-byte
/// upstream slabs, 8 blocks per segment.
type Slab<Tag> = LocalBuffer<'static, u8, Tag, 2048, 16>;
type Pool<'up, SlabTag, PoolTag> =
    GrowingPool<'up, Slab<SlabTag>, u16, PoolTag, 256, 8, 4, 4>;

macro_rules! fixture {
    ($slab:ident: $slab_tag:ty, $pool:ident: $pool_tag:ty) => {
        let $slab = Slab::<$slab_tag>::new();
        let $pool = Pool::<$slab_tag, $pool_tag>::new(&$slab);
        // Safety: both bindings stay in place for the whole test and drop
        // in reverse order, unregistering themselves.
        unsafe {
            $slab.register().unwrap();
            $pool.register().unwrap();
        }
    };
}

#[test]
fn allocations_spill_across_segments() {
    let _ = env_logger::builder().is_test(true).try_init();
    fixture!(slab: SpillSlabTag, pool: SpillPoolTag);

    let initial = pool.available();
    assert_eq!(initial, 0);

    // Ten allocations cannot fit the eight blocks of one segment.
    let ptrs: Vec<_> = (0..10).map(|_| pool.allocate_block().unwrap()).collect();
    let segments: BTreeSet<_> = ptrs.iter().map(|p| p.segment_id()).collect();
    assert!(segments.len() >= 2, "expected a segment spill, got {:?}", segments);

    // All ten are distinct and resolve to distinct addresses.
    let addrs: BTreeSet<_> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
    assert_eq!(addrs.len(), 10);

    for ptr in ptrs {
        pool.deallocate_block(ptr).unwrap();
    }
    // Draining released every segment, restoring the initial size.
    assert_eq!(pool.available(), initial);
}

#[test]
fn grows_managers_up_to_the_limit() {
    fixture!(slab: GrowSlabTag, pool: GrowPoolTag);

    // One manager serves 4 segments x 8 blocks and costs five slab
    // blocks (node + segments). Three managers fit the 16-block slab;
    // the fourth claims the last slab block for its node and then hits
    // the manager limit trying to grow further.
    let mut held = Vec::new();
    let err = loop {
        match pool.allocate_block() {
            Ok(ptr) => held.push(ptr),
            Err(e) => break e,
        }
    };
    assert_eq!(held.len(), 96);
    assert_eq!(pool.manager_count(), 4);
    assert_eq!(err, PoolError::ManagerLimit);

    // Returning one block makes allocation work again.
    pool.deallocate_block(held.pop().unwrap()).unwrap();
    assert!(pool.allocate_block().is_ok());
    for ptr in held {
        pool.deallocate_block(ptr).unwrap();
    }
}

#[test]
fn round_trips_raw_pointers() {
    fixture!(slab: RoundSlabTag, pool: RoundPoolTag);

    let ptrs: Vec<_> = (0..12).map(|_| pool.allocate_block().unwrap()).collect();
    for &ptr in &ptrs {
        let raw = ptr.to_raw();
        assert!(!raw.is_null());
        // The reconstructed pointer carries the same triple the pool
        // emitted on allocation.
        let back = SegPtr::<u8, u16, RoundPoolTag, 256, 8, 4, 4>::from_ptr(raw);
        assert_eq!(back.manager_id(), ptr.manager_id());
        assert_eq!(back.segment_id(), ptr.segment_id());
        assert_eq!(back.offset(), ptr.offset());
        assert_eq!(back, ptr);
    }

    // The owner lookup agrees with the encoded manager id.
    for &ptr in &ptrs {
        let raw = core::ptr::NonNull::new(ptr.to_raw()).unwrap();
        assert_eq!(
            pool.find_manager_for_pointer(raw).unwrap(),
            ptr.manager_id()
        );
    }

    for ptr in ptrs {
        pool.deallocate_block(ptr).unwrap();
    }
}

#[test]
fn rejects_bad_deallocations() {
    fixture!(slab: ResetSlabTag, pool: ResetPoolTag);

    assert_eq!(
        pool.deallocate_block(SegPtr::null()).unwrap_err(),
        PoolError::InvalidPointer
    );

    let ptr = pool.allocate_block().unwrap();
    // A manager id the pool never created.
    let forged = SegPtr::new(2, 0, 0);
    assert_eq!(
        pool.deallocate_block(forged).unwrap_err(),
        PoolError::InvalidManagerId
    );

    pool.deallocate_block(ptr).unwrap();

    // Reset keeps the manager chain but releases every segment.
    let before = pool.manager_count();
    let _held: Vec<_> = (0..10).map(|_| pool.allocate_block().unwrap()).collect();
    pool.reset();
    assert_eq!(pool.manager_count(), before);
    assert_eq!(pool.available(), 0);
    // The pool is immediately usable again.
    assert!(pool.allocate_block().is_ok());
}

#[quickcheck]
fn random_alloc_dealloc_holds_invariants(bytecode: Vec<u8>) {
    let slab = Slab::<RandomSlabTag>::new();
    let pool = Pool::<RandomSlabTag, RandomPoolTag>::new(&slab);
    // Safety: as in `fixture!`; quickcheck reruns share the tags, and
    // each run unregisters on drop.
    unsafe {
        slab.register().unwrap();
        pool.register().unwrap();
    }

    let mut outstanding: Vec<SegPtr<u8, u16, RandomPoolTag, 256, 8, 4, 4>> = Vec::new();
    let mut it = bytecode.into_iter();
    while let Some(op) = it.next() {
        match op % 4 {
            0..=1 => {
                if let Ok(ptr) = pool.allocate_block() {
                    assert!(!ptr.is_null());
                    assert!(!outstanding.contains(&ptr));
                    outstanding.push(ptr);
                }
            }
            2 => {
                if let Some(index) = it.next() {
                    if !outstanding.is_empty() {
                        let ptr = outstanding.swap_remove(index as usize % outstanding.len());
                        pool.deallocate_block(ptr).unwrap();
                    }
                }
            }
            3 => {
                // The books always balance: every outstanding pointer is
                // owned by the manager it names.
                for &ptr in &outstanding {
                    let raw = core::ptr::NonNull::new(ptr.to_raw()).unwrap();
                    assert_eq!(
                        pool.find_manager_for_pointer(raw).unwrap(),
                        ptr.manager_id()
                    );
                }
            }
            _ => unreachable!(),
        }
    }

    for ptr in outstanding {
        pool.deallocate_block(ptr).unwrap();
    }
    assert_eq!(pool.available(), 0);
}
