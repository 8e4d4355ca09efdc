extern crate std;

use std::prelude::v1::*;

use super::*;
use crate::buffer::LocalBuffer;

crate::define_pool_tag!(BasicRingTag);
crate::define_pool_tag!(BasicNodeTag);
crate::define_pool_tag!(SpanRingTag);
crate::define_pool_tag!(SpanNodeTag);
crate::define_pool_tag!(TwoRingTag);
crate::define_pool_tag!(TwoNodeTag);
crate::define_pool_tag!(OomRingTag);
crate::define_pool_tag!(OomNodeTag);

type Rings<Tag> = LocalBuffer<'static, u8, Tag, 16, 8>;
type Nodes<Tag> = LocalBuffer<'static, u8, Tag, 64, 8>;

#[test]
fn fifo_across_ring_boundaries() {
    let rings = Rings::<SpanRingTag>::new();
    let nodes = Nodes::<SpanNodeTag>::new();
    // Rings of 4 bytes force a new ring every fourth push.
    let mut queue: Queue<u8, _, _, 4> = Queue::new(&rings, &nodes);

    for i in 0..11 {
        queue.push(i).unwrap();
    }
    assert_eq!(queue.len(), 11);
    assert_eq!(*queue.front().unwrap(), 0);
    assert_eq!(*queue.back().unwrap(), 10);
    // Three rings are live (4 + 4 + 3 elements).
    assert_eq!(rings.available(), 5);

    for i in 0..11 {
        assert_eq!(queue.pop().unwrap(), i);
    }
    assert!(queue.is_empty());
    assert_eq!(queue.pop().unwrap_err(), PoolError::ListEmpty);
    // Every ring and node block was released on the way.
    assert_eq!(rings.available(), 8);
    assert_eq!(nodes.available(), 8);
}

#[test]
fn drained_rings_are_released_eagerly() {
    let rings = Rings::<BasicRingTag>::new();
    let nodes = Nodes::<BasicNodeTag>::new();
    let mut queue: Queue<u8, _, _, 4> = Queue::new(&rings, &nodes);

    for i in 0..8 {
        queue.push(i).unwrap();
    }
    assert_eq!(rings.available(), 6);
    // Draining the oldest ring hands its blocks back immediately.
    for i in 0..4 {
        assert_eq!(queue.pop().unwrap(), i);
    }
    assert_eq!(rings.available(), 7);
    assert_eq!(nodes.available(), 7);

    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(rings.available(), 8);
    assert_eq!(nodes.available(), 8);
}

#[test]
fn two_queues_interleave_without_mixing() {
    let rings = Rings::<TwoRingTag>::new();
    let nodes = Nodes::<TwoNodeTag>::new();

    // The C-facing byte-queue sequence, at the Rust level: two queues
    // sharing both pools.
    let mut q0: Queue<u8, _, _, 4> = Queue::new(&rings, &nodes);
    q0.push(0).unwrap();
    q0.push(1).unwrap();
    let mut q1: Queue<u8, _, _, 4> = Queue::new(&rings, &nodes);
    q1.push(3).unwrap();
    q0.push(2).unwrap();
    q1.push(4).unwrap();
    assert_eq!(q0.pop().unwrap(), 0);
    assert_eq!(q0.pop().unwrap(), 1);
    q0.push(5).unwrap();
    q1.push(6).unwrap();
    assert_eq!(q0.pop().unwrap(), 2);
    assert_eq!(q0.pop().unwrap(), 5);
    drop(q0);
    assert_eq!(q1.pop().unwrap(), 3);
    assert_eq!(q1.pop().unwrap(), 4);
    assert_eq!(q1.pop().unwrap(), 6);
    assert!(q1.is_empty());

    drop(q1);
    assert_eq!(rings.available(), 8);
    assert_eq!(nodes.available(), 8);
}

#[test]
fn push_fails_when_either_pool_is_dry() {
    let rings = Rings::<OomRingTag>::new();
    let nodes = Nodes::<OomNodeTag>::new();
    let mut queue: Queue<u8, _, _, 4> = Queue::new(&rings, &nodes);

    // Eight rings of four bytes exhaust the ring pool.
    for i in 0..32 {
        queue.push(i).unwrap();
    }
    assert_eq!(queue.push(32).unwrap_err(), PoolError::OutOfMemory);
    // The failed push did not lose elements.
    assert_eq!(queue.len(), 32);

    // Freeing the oldest ring makes room again.
    for i in 0..4 {
        assert_eq!(queue.pop().unwrap(), i);
    }
    queue.push(32).unwrap();
}
