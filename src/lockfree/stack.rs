//! Treiber's lock-free stack over a fixed node pool.
//!
//! Usable with any number of producers and consumers.
//!
//! R. K. Treiber.  Systems Programming: Coping with Parallelism.  IBM Research Report RJ 5118,
//! 1986.

use core::fmt;
use core::marker::PhantomData;

use crossbeam_utils::CachePadded;

use super::pool::NodePool;
use super::tagged::{AtomicTagged, TaggedIndex};
use crate::backoff::{Backoff, SpinBackoff};
use crate::error::Full;
use crate::sync::Ordering;

/// Treiber's lock-free stack holding at most `N` values.
///
/// The head is a tagged node index, so a node that is popped, recycled and pushed again between
/// another thread's read of the head and its compare-and-swap cannot be mistaken for the node
/// that thread saw.
pub struct TreiberStack<T, const N: usize, B: Backoff = SpinBackoff> {
    head: CachePadded<AtomicTagged>,
    pool: NodePool<T, N>,
    _backoff: PhantomData<B>,
}

// Any particular `T` should never be accessed concurrently, so no need for `Sync`.
unsafe impl<T: Send, const N: usize, B: Backoff> Send for TreiberStack<T, N, B> {}
unsafe impl<T: Send, const N: usize, B: Backoff> Sync for TreiberStack<T, N, B> {}

impl<T, const N: usize, B: Backoff> Default for TreiberStack<T, N, B> {
    fn default() -> Self {
        tracing::trace!(capacity = N, "treiber stack created");
        Self {
            head: CachePadded::new(AtomicTagged::new(TaggedIndex::null())),
            pool: NodePool::new(),
            _backoff: PhantomData,
        }
    }
}

impl<T, const N: usize, B: Backoff> TreiberStack<T, N, B> {
    /// Creates a new, empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of values the stack can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Pushes a value on top of the stack.
    ///
    /// Fails only when all `N` nodes are in use; contention never makes a push fail.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let Some(index) = self.pool.acquire::<B>() else {
            return Err(Full(value));
        };
        // SAFETY: `index` was just acquired and is not reachable by anyone else.
        unsafe { self.pool.write(index, value) };
        self.push_node(index);
        Ok(())
    }

    /// Builds a value in a free node with `make` and pushes it.
    ///
    /// Returns `false` without calling `make` if the stack is full.
    pub fn emplace_with<F: FnOnce() -> T>(&self, make: F) -> bool {
        let Some(index) = self.pool.acquire::<B>() else {
            return false;
        };
        // SAFETY: as in `push`.
        unsafe { self.pool.write_with::<B>(index, make) };
        self.push_node(index);
        true
    }

    /// Attempts to pop the top element from the stack.
    ///
    /// Returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let mut backoff = B::default();
        loop {
            match self.try_pop() {
                // SAFETY: `try_pop` unlinked `index`, so we own it.
                Ok(Some(index)) => return Some(unsafe { self.take(index) }),
                Ok(None) => return None,
                Err(()) => backoff.pause(),
            }
        }
    }

    /// Returns `true` if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub(crate) fn push_node(&self, index: u32) {
        let mut backoff = B::default();
        while self.try_push(index).is_err() {
            backoff.pause();
        }
    }

    /// Tries to link the owned, initialized node `index` on top.
    ///
    /// Returns `Err(())` if the CAS failed.
    pub(crate) fn try_push(&self, index: u32) -> Result<(), ()> {
        let head = self.head.load(Ordering::Relaxed);
        self.pool.set_next(index, head.index);
        // Release: publishes both the payload and the link.
        self.head
            .compare_exchange(
                head,
                head.successor(index),
                Ordering::Release,
                Ordering::Relaxed,
            )
            .map(|_| ())
            .map_err(|_| ())
    }

    /// Tries to unlink the top node.
    ///
    /// Returns `Ok(Some(index))` if `index` was unlinked and is now owned by the caller;
    /// `Ok(None)` if the stack is empty; and `Err(())` if the CAS failed.
    pub(crate) fn try_pop(&self) -> Result<Option<u32>, ()> {
        let head = self.head.load(Ordering::Acquire);
        let Some(index) = head.get() else {
            return Ok(None);
        };
        // May be stale if `index` was recycled meanwhile; the tag makes the CAS fail then.
        let next = self.pool.next(index);

        self.head
            .compare_exchange(
                head,
                head.successor(next),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .map(|_| Some(index))
            .map_err(|_| ())
    }

    /// Moves the payload out of an unlinked node and returns the node to the pool.
    ///
    /// # Safety
    ///
    /// The caller must own `index` and its payload must be initialized and published to the
    /// caller.
    pub(crate) unsafe fn take(&self, index: u32) -> T {
        // SAFETY: forwarded from the caller.
        let value = unsafe { self.pool.take(index) };
        self.pool.release::<B>(index);
        value
    }

    pub(crate) fn pool(&self) -> &NodePool<T, N> {
        &self.pool
    }
}

impl<T, const N: usize, B: Backoff> Drop for TreiberStack<T, N, B> {
    fn drop(&mut self) {
        let mut dropped = 0usize;
        while self.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "treiber stack dropped with pending values");
        }
    }
}

impl<T, const N: usize, B: Backoff> fmt::Debug for TreiberStack<T, N, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreiberStack")
            .field("capacity", &N)
            .field("head", &self.head.load(Ordering::Relaxed))
            .finish()
    }
}
