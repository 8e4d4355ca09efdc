//! A FIFO queue built as a linked list of ring buffers.
use crate::{
    alloc::BlockAllocator,
    error::{PoolError, PoolResult},
    list::OffsetList,
    ring::RingBuffer,
};

/// An unbounded-within-its-pools FIFO of `V`.
///
/// The queue chains [`RingBuffer`]s of `CAPACITY` elements through an
/// [`OffsetList`], drawing from two distinct allocators: `RA` provides the
/// ring element storage (one block per ring) and `NA` provides the list
/// nodes (one block per ring as well). Pushes fill the newest ring,
/// prepending a fresh one when it is full; pops drain the oldest ring at
/// the list's tail and release it as soon as it empties.
///
/// # Examples
///
/// ```rust
/// use blockpool::{define_pool_tag, LocalBuffer, Queue};
///
/// define_pool_tag!(RingTag);
/// define_pool_tag!(NodeTag);
///
/// let rings: LocalBuffer<u8, RingTag, 16, 8> = LocalBuffer::new();
/// let nodes: LocalBuffer<u8, NodeTag, 64, 8> = LocalBuffer::new();
///
/// let mut queue: Queue<u32, _, _, 4> = Queue::new(&rings, &nodes);
/// queue.push(10).unwrap();
/// queue.push(20).unwrap();
/// assert_eq!(queue.pop().unwrap(), 10);
/// assert_eq!(queue.pop().unwrap(), 20);
/// assert!(queue.is_empty());
/// ```
pub struct Queue<'a, V, RA, NA, const CAPACITY: usize>
where
    RA: BlockAllocator,
    NA: BlockAllocator,
{
    ring_alloc: &'a RA,
    list: OffsetList<'a, RingBuffer<'a, V, RA, CAPACITY>, NA>,
}

impl<'a, V, RA, NA, const CAPACITY: usize> Queue<'a, V, RA, NA, CAPACITY>
where
    RA: BlockAllocator,
    NA: BlockAllocator,
{
    /// An empty queue drawing ring storage from `ring_alloc` and list
    /// nodes from `node_alloc`.
    pub fn new(ring_alloc: &'a RA, node_alloc: &'a NA) -> Self {
        Self {
            ring_alloc,
            list: OffsetList::new(node_alloc),
        }
    }

    /// Append `value`.
    ///
    /// Fails with [`PoolError::OutOfMemory`] when a fresh ring is needed
    /// and either pool has no block left.
    pub fn push(&mut self, value: V) -> PoolResult {
        let needs_ring = match self.list.front() {
            Ok(ring) => ring.is_full(),
            Err(_) => true,
        };
        if needs_ring {
            let ring = RingBuffer::new(self.ring_alloc)?;
            self.list.push_front(ring)?;
        }
        self.list.front_mut()?.push(value)
    }

    /// Detach and return the oldest element; a ring drained by the pop is
    /// released immediately.
    ///
    /// Fails with [`PoolError::ListEmpty`] when the queue is empty.
    pub fn pop(&mut self) -> PoolResult<V> {
        if self.is_empty() {
            return Err(PoolError::ListEmpty);
        }
        let ring = self.list.back_mut()?;
        let value = ring.pop()?;
        if ring.is_empty() {
            self.list.erase_back()?;
        }
        Ok(value)
    }

    /// The oldest element.
    pub fn front(&self) -> PoolResult<&V> {
        self.list.back()?.front()
    }

    /// The newest element.
    pub fn back(&self) -> PoolResult<&V> {
        self.list.front()?.back()
    }

    /// Whether the queue holds no element.
    ///
    /// The list never retains an empty ring, so list-empty is
    /// queue-empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// The number of stored elements. O(rings).
    pub fn len(&self) -> usize {
        self.list.iter().map(|ring| ring.len()).sum()
    }

    /// Drop every element and release every ring.
    pub fn clear(&mut self) {
        self.list.clear();
    }
}

#[cfg(test)]
mod tests;
