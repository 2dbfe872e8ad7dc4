//! Fixed-capacity node pool.
//!
//! All nodes of a stack live in one boxed slice owned by the pool for the lifetime of the stack.
//! Free nodes are linked into a tagged Treiber list. A node taken out of the pool is never
//! returned to the allocator, so a thread holding a stale index can still read its `next` field
//! safely; the tag on the list head makes the stale compare-and-swap fail.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};

use crossbeam_utils::CachePadded;

use super::tagged::{AtomicTagged, TaggedIndex, MAX_NODES, NIL};
use crate::backoff::Backoff;
use crate::sync::{AtomicU32, Ordering};

/// Intrusive cell: a link and uninitialized storage for one `T`.
pub(crate) struct Node<T> {
    next: AtomicU32,
    data: UnsafeCell<MaybeUninit<T>>,
}

pub(crate) struct NodePool<T, const N: usize> {
    free: CachePadded<AtomicTagged>,
    nodes: Box<[Node<T>]>,
}

// A payload is only touched by the thread that owns its node.
unsafe impl<T: Send, const N: usize> Send for NodePool<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for NodePool<T, N> {}

impl<T, const N: usize> NodePool<T, N> {
    const CAPACITY_OK: () = {
        assert!(N > 0, "capacity must be non-zero");
        assert!(N <= MAX_NODES, "capacity must fit in a u32 node index");
    };

    pub(crate) fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;

        let nodes = (0..N)
            .map(|i| Node {
                next: AtomicU32::new(if i + 1 < N { (i + 1) as u32 } else { NIL }),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            free: CachePadded::new(AtomicTagged::new(TaggedIndex::new(0, 0))),
            nodes,
        }
    }

    /// Takes a node off the free list. Returns `None` if every node is in use.
    pub(crate) fn acquire<B: Backoff>(&self) -> Option<u32> {
        let mut backoff = B::default();
        // Acquire: the `next` link was written before the releasing CAS.
        let mut head = self.free.load(Ordering::Acquire);
        while let Some(index) = head.get() {
            let next = self.next(index);
            match self.free.compare_exchange_weak(
                head,
                head.successor(next),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(actual) => head = actual,
            }
            backoff.pause();
        }
        None
    }

    /// Puts `index` back on the free list.
    ///
    /// The node's payload must already have been moved out or never written.
    pub(crate) fn release<B: Backoff>(&self, index: u32) {
        let mut backoff = B::default();
        let mut head = self.free.load(Ordering::Relaxed);
        loop {
            self.set_next(index, head.index);
            match self.free.compare_exchange_weak(
                head,
                head.successor(index),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
            backoff.pause();
        }
    }

    pub(crate) fn next(&self, index: u32) -> u32 {
        self.nodes[index as usize].next.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next(&self, index: u32, next: u32) {
        self.nodes[index as usize].next.store(next, Ordering::Relaxed);
    }

    /// Moves `value` into the node.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own `index` (acquired from this pool and not yet published)
    /// and its payload must be uninitialized.
    pub(crate) unsafe fn write(&self, index: u32, value: T) {
        // SAFETY: exclusive ownership of the node per the contract above.
        unsafe { (*self.nodes[index as usize].data.get()).write(value) };
    }

    /// Builds the payload in the node with `make`. If `make` panics the node goes back to the
    /// pool.
    ///
    /// # Safety
    ///
    /// Same as [`NodePool::write`].
    pub(crate) unsafe fn write_with<B: Backoff>(&self, index: u32, make: impl FnOnce() -> T) {
        let reclaim: Reclaim<'_, T, N, B> = Reclaim {
            pool: self,
            index,
            _backoff: PhantomData,
        };
        let value = make();
        mem::forget(reclaim);
        // SAFETY: forwarded from the caller.
        unsafe { self.write(index, value) };
    }

    /// Moves the payload out of the node, leaving it uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own `index` and its payload must be initialized, with the
    /// write that initialized it happening before this call.
    pub(crate) unsafe fn take(&self, index: u32) -> T {
        // SAFETY: exclusive ownership and initialization per the contract above.
        unsafe { (*self.nodes[index as usize].data.get()).assume_init_read() }
    }
}

impl<T, const N: usize> fmt::Debug for NodePool<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("capacity", &N)
            .field("free", &self.free.load(Ordering::Relaxed))
            .finish()
    }
}

/// Returns a node to the pool if the payload constructor unwinds.
struct Reclaim<'a, T, const N: usize, B: Backoff> {
    pool: &'a NodePool<T, N>,
    index: u32,
    _backoff: PhantomData<B>,
}

impl<T, const N: usize, B: Backoff> Drop for Reclaim<'_, T, N, B> {
    fn drop(&mut self) {
        self.pool.release::<B>(self.index);
    }
}
