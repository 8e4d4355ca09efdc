//! A handle-based byte queue exposed to C.
//!
//! The functions here wrap a [`Queue`] of bytes over a process-wide arena
//! of pools, so freestanding C code gets FIFO queues without ever touching
//! a host heap. Failure reporting follows the embedded convention of
//! overridable hooks rather than error returns: an allocation failure
//! invokes [`set_out_of_memory_hook`]'s handler, a contract violation
//! (null handle, draining an empty queue) invokes
//! [`set_illegal_operation_hook`]'s handler, and both default to
//! terminating.
//!
//! ```c
//! queue_t *q = create_queue();
//! enqueue_byte(q, 42);
//! unsigned char b = dequeue_byte(q);
//! destroy_queue(q);
//! ```
//!
//! The API is single-threaded by contract; a spin lock serializes the
//! calls so that misuse degrades into blocking rather than corruption.
use core::cell::UnsafeCell;

use spin::{Mutex, Once};

use crate::{
    alloc::BlockAllocator, define_pool_tag, pool::GrowingPool, ptr::thin::ThinPtr,
    ptr::PoolPointer, queue::Queue,
};

define_pool_tag!(FfiSlabTag);
define_pool_tag!(FfiRingTag);
define_pool_tag!(FfiNodeTag);
define_pool_tag!(FfiQueueTag);

/// Ring capacity of each chained buffer, in bytes.
const RING_CAPACITY: usize = 16;

/// The slab feeding the node pool: 32 blocks of 1 KiB.
type Slab = crate::LocalBuffer<'static, u16, FfiSlabTag, 1024, 32>;
/// Ring element storage: one 16-byte block per ring.
type RingAlloc = crate::LocalBuffer<'static, u16, FfiRingTag, 16, 256>;
/// List nodes: 64-byte blocks carved out of the slab, 16 per segment.
type NodePool = GrowingPool<'static, Slab, u16, FfiNodeTag, 64, 16, 8, 8>;
/// Queue objects themselves: 64-byte blocks.
type QueueAlloc = crate::LocalBuffer<'static, u8, FfiQueueTag, 64, 8>;

type ByteQueueInner = Queue<'static, u8, RingAlloc, NodePool, RING_CAPACITY>;

/// An opaque byte queue handle.
pub struct ByteQueue {
    inner: ByteQueueInner,
}

// A queue handle must fit a `QueueAlloc` block.
const _: () = {
    assert!(core::mem::size_of::<ByteQueue>() <= 64);
    assert!(core::mem::align_of::<ByteQueue>() <= 64);
};

/// A cell whose contents are only touched under [`API_LOCK`], per the C
/// API's single-threaded contract.
struct LockProtected<T>(UnsafeCell<Option<T>>);

// Safety: every access goes through `arena()`, which runs under the API
//         lock.
unsafe impl<T> Sync for LockProtected<T> {}

impl<T> LockProtected<T> {
    const fn empty() -> Self {
        Self(UnsafeCell::new(None))
    }
}

static API_LOCK: Mutex<()> = Mutex::new(());
static INIT: Once<()> = Once::new();
static SLAB: LockProtected<Slab> = LockProtected::empty();
static RING_ALLOC: LockProtected<RingAlloc> = LockProtected::empty();
static NODE_POOL: LockProtected<NodePool> = LockProtected::empty();
static QUEUE_ALLOC: LockProtected<QueueAlloc> = LockProtected::empty();

struct Arena {
    ring_alloc: &'static RingAlloc,
    node_pool: &'static NodePool,
    queue_alloc: &'static QueueAlloc,
}

/// Build and register the static pools on first use.
///
/// # Safety
///
/// Must be called with `API_LOCK` held.
unsafe fn arena() -> Arena {
    INIT.call_once(|| {
        // Safety: the statics are written exactly once, before any
        //         reference escapes, and never move again; registration
        //         therefore sees their final addresses.
        unsafe {
            (*SLAB.0.get()) = Some(Slab::new());
            (*RING_ALLOC.0.get()) = Some(RingAlloc::new());
            let slab: &'static Slab = (*SLAB.0.get()).as_ref().expect("slab just initialized");
            (*NODE_POOL.0.get()) = Some(NodePool::new(slab));
            (*QUEUE_ALLOC.0.get()) = Some(QueueAlloc::new());

            // Registration of a fresh tag cannot be contested; failing
            // here means the statics were corrupted, which is
            // unrecoverable.
            slab.register().expect("slab tag already registered");
            static_ref(&RING_ALLOC)
                .register()
                .expect("ring tag already registered");
            static_ref(&NODE_POOL)
                .register()
                .expect("node pool tag already registered");
            static_ref(&QUEUE_ALLOC)
                .register()
                .expect("queue tag already registered");
        }
        log::trace!("byte queue arena initialized");
    });
    Arena {
        ring_alloc: static_ref(&RING_ALLOC),
        node_pool: static_ref(&NODE_POOL),
        queue_alloc: static_ref(&QUEUE_ALLOC),
    }
}

/// A reference into an initialized arena static.
///
/// # Safety
///
/// Must be called with `API_LOCK` held, after `INIT` ran.
unsafe fn static_ref<T>(cell: &'static LockProtected<T>) -> &'static T {
    (*cell.0.get()).as_ref().expect("arena initialized")
}

/// A failure handler installable from C.
pub type FailureHook = extern "C" fn();

static OOM_HOOK: Mutex<Option<FailureHook>> = Mutex::new(None);
static ILLEGAL_HOOK: Mutex<Option<FailureHook>> = Mutex::new(None);

fn on_out_of_memory() {
    let hook = *OOM_HOOK.lock();
    match hook {
        Some(hook) => hook(),
        None => panic!("byte queue: out of memory"),
    }
}

fn on_illegal_operation() {
    let hook = *ILLEGAL_HOOK.lock();
    match hook {
        Some(hook) => hook(),
        None => panic!("byte queue: illegal operation"),
    }
}

/// Install `hook` as the out-of-memory handler; `None` restores the
/// terminating default.
#[no_mangle]
pub extern "C" fn set_out_of_memory_hook(hook: Option<FailureHook>) {
    *OOM_HOOK.lock() = hook;
}

/// Install `hook` as the illegal-operation handler; `None` restores the
/// terminating default.
#[no_mangle]
pub extern "C" fn set_illegal_operation_hook(hook: Option<FailureHook>) {
    *ILLEGAL_HOOK.lock() = hook;
}

/// Create a new byte queue.
///
/// Returns null after invoking the out-of-memory hook when the queue pool
/// is exhausted.
#[no_mangle]
pub extern "C" fn create_queue() -> *mut ByteQueue {
    let _guard = API_LOCK.lock();
    // Safety: the lock is held.
    let arena = unsafe { arena() };

    let block = match arena.queue_alloc.allocate_block() {
        Ok(block) => block,
        Err(_) => {
            drop(_guard);
            on_out_of_memory();
            return core::ptr::null_mut();
        }
    };
    let raw = block.to_raw().cast::<ByteQueue>();
    // Safety: the fresh block is exclusively ours and sized for a
    //         `ByteQueue` (checked at compile time above).
    unsafe {
        raw.write(ByteQueue {
            inner: Queue::new(arena.ring_alloc, arena.node_pool),
        });
    }
    raw
}

/// Destroy `q`, releasing its rings and its handle block.
///
/// A null `q` invokes the illegal-operation hook.
#[no_mangle]
pub extern "C" fn destroy_queue(q: *mut ByteQueue) {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return;
    }
    // Safety: the lock is held.
    let arena = unsafe { arena() };
    // Safety: a non-null handle came from `create_queue` and has not been
    //         destroyed (destroying twice is caller UB, as in free()).
    unsafe {
        core::ptr::drop_in_place(q);
    }
    let ptr = ThinPtr::<u8, u8, FfiQueueTag, 64>::from_ptr(q.cast());
    let _ = arena.queue_alloc.deallocate_block(ptr);
}

/// Append `b` to `q`.
///
/// A null `q` invokes the illegal-operation hook; exhaustion of either
/// backing pool invokes the out-of-memory hook.
#[no_mangle]
pub extern "C" fn enqueue_byte(q: *mut ByteQueue, b: u8) {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return;
    }
    // Safety: the lock is held; see `destroy_queue` for the handle
    //         contract.
    let queue = unsafe { &mut *q };
    if queue.inner.push(b).is_err() {
        drop(_guard);
        on_out_of_memory();
    }
}

/// Detach and return the oldest byte of `q`.
///
/// A null `q` or an empty queue invokes the illegal-operation hook and
/// returns 0 if the hook returns.
#[no_mangle]
pub extern "C" fn dequeue_byte(q: *mut ByteQueue) -> u8 {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return 0;
    }
    // Safety: as `enqueue_byte`.
    let queue = unsafe { &mut *q };
    match queue.inner.pop() {
        Ok(b) => b,
        Err(_) => {
            drop(_guard);
            on_illegal_operation();
            0
        }
    }
}

/// Whether `q` holds no byte. A null `q` invokes the illegal-operation
/// hook and reads as empty.
#[no_mangle]
pub extern "C" fn queue_is_empty(q: *const ByteQueue) -> bool {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return true;
    }
    // Safety: as `enqueue_byte`.
    unsafe { (*q).inner.is_empty() }
}

/// The number of bytes in `q`. A null `q` invokes the illegal-operation
/// hook and reads as 0.
#[no_mangle]
pub extern "C" fn queue_size(q: *const ByteQueue) -> usize {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return 0;
    }
    // Safety: as `enqueue_byte`.
    unsafe { (*q).inner.len() }
}

/// Drop every byte of `q`, keeping the queue alive. A null `q` invokes
/// the illegal-operation hook.
#[no_mangle]
pub extern "C" fn queue_clear(q: *mut ByteQueue) {
    let _guard = API_LOCK.lock();
    if q.is_null() {
        drop(_guard);
        on_illegal_operation();
        return;
    }
    // Safety: as `enqueue_byte`.
    unsafe { (*q).inner.clear() }
}
