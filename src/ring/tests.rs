extern crate std;

use std::{prelude::v1::*, rc::Rc};

use super::*;
use crate::buffer::LocalBuffer;

crate::define_pool_tag!(BasicTag);
crate::define_pool_tag!(WrapTag);
crate::define_pool_tag!(DropTag);
crate::define_pool_tag!(StorageTag);

type Blocks<Tag> = LocalBuffer<'static, u8, Tag, 64, 4>;

#[test]
fn fifo_order_with_bounds() {
    let blocks = Blocks::<BasicTag>::new();
    let mut ring: RingBuffer<u32, _, 4> = RingBuffer::new(&blocks).unwrap();

    assert!(ring.is_empty());
    assert_eq!(ring.capacity(), 4);
    assert_eq!(ring.pop().unwrap_err(), PoolError::ListEmpty);
    assert_eq!(ring.front().unwrap_err(), PoolError::ListEmpty);

    for i in 0..4 {
        ring.push(i).unwrap();
    }
    assert!(ring.is_full());
    assert_eq!(ring.push(4).unwrap_err(), PoolError::ListFull);
    assert_eq!(*ring.front().unwrap(), 0);
    assert_eq!(*ring.back().unwrap(), 3);
    assert_eq!(ring.get(2), Some(&2));
    assert_eq!(ring.get(4), None);

    let collected: Vec<u32> = ring.iter().copied().collect();
    assert_eq!(collected, [0, 1, 2, 3]);

    for i in 0..4 {
        assert_eq!(ring.pop().unwrap(), i);
    }
    assert!(ring.is_empty());
}

#[test]
fn wraps_around_the_storage_block() {
    let blocks = Blocks::<WrapTag>::new();
    let mut ring: RingBuffer<u32, _, 4> = RingBuffer::new(&blocks).unwrap();

    // Interleave pushes and pops so the indices lap the capacity.
    for lap in 0u32..10 {
        ring.push(lap).unwrap();
        ring.push(lap + 100).unwrap();
        assert_eq!(ring.pop().unwrap(), lap);
        assert_eq!(ring.pop().unwrap(), lap + 100);
    }
    assert!(ring.is_empty());
    assert_eq!(ring.len(), 0);
}

#[test]
fn consumes_exactly_one_block() {
    let blocks = Blocks::<StorageTag>::new();
    let ring_a: RingBuffer<u8, _, 16> = RingBuffer::new(&blocks).unwrap();
    assert_eq!(blocks.available(), 3);
    let ring_b: RingBuffer<u8, _, 16> = RingBuffer::new(&blocks).unwrap();
    assert_eq!(blocks.available(), 2);
    drop(ring_a);
    drop(ring_b);
    assert_eq!(blocks.available(), 4);
}

#[test]
fn drop_and_clear_release_elements() {
    let blocks = Blocks::<DropTag>::new();
    let witness = Rc::new(());

    let mut ring: RingBuffer<Rc<()>, _, 4> = RingBuffer::new(&blocks).unwrap();
    for _ in 0..3 {
        ring.push(Rc::clone(&witness)).unwrap();
    }
    assert_eq!(Rc::strong_count(&witness), 4);

    ring.clear();
    assert_eq!(Rc::strong_count(&witness), 1);
    assert!(ring.is_empty());

    ring.push(Rc::clone(&witness)).unwrap();
    drop(ring);
    // The element was dropped and the storage block returned.
    assert_eq!(Rc::strong_count(&witness), 1);
    assert_eq!(blocks.available(), 4);
}
