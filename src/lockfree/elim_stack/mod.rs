//! Elimination-backoff stack.
//!
//! A [`TreiberStack`] with an elimination array on the side. Every push and pop first tries the
//! shared head a bounded number of times. If that keeps failing, the operation tries once to meet
//! an opposite operation in the elimination array, where the two cancel out without touching the
//! head. If no partner shows up it goes back to the head and retries without bound.
//!
//! Hendler, Shavit and Yerushalmi.  A Scalable Lock-free Stack Algorithm.  SPAA 2004.

mod elim;

use core::fmt;

use crossbeam_utils::CachePadded;

use self::elim::EliminationArray;
use super::TreiberStack;
use crate::backoff::{Backoff, SpinBackoff};
use crate::error::Full;
use crate::sync::{AtomicUsize, Ordering};

/// Default number of elimination slots.
pub const ELIM_SIZE: usize = 8;

/// Tuning knobs of an [`EliminationStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EliminationConfig {
    /// CAS attempts on the shared head before trying elimination.
    pub direct_attempts: usize,

    /// Backoff rounds a popper waits in the elimination array for a pusher.
    pub rendezvous_spins: usize,
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            direct_attempts: 5,
            rendezvous_spins: 5,
        }
    }
}

impl EliminationConfig {
    /// Sets [`direct_attempts`](Self::direct_attempts).
    pub fn direct_attempts(mut self, attempts: usize) -> Self {
        self.direct_attempts = attempts;
        self
    }

    /// Sets [`rendezvous_spins`](Self::rendezvous_spins).
    pub fn rendezvous_spins(mut self, spins: usize) -> Self {
        self.rendezvous_spins = spins;
        self
    }
}

/// Counters of an [`EliminationStack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EliminationStats {
    /// Push/pop pairs that completed through the elimination array.
    pub eliminated: usize,
}

/// Elimination-backoff stack holding at most `N` values, with `SLOTS` elimination slots.
pub struct EliminationStack<
    T,
    const N: usize,
    const SLOTS: usize = ELIM_SIZE,
    B: Backoff = SpinBackoff,
> {
    inner: TreiberStack<T, N, B>,
    slots: EliminationArray<SLOTS>,
    config: EliminationConfig,
    eliminated: CachePadded<AtomicUsize>,
}

impl<T, const N: usize, const SLOTS: usize, B: Backoff> Default
    for EliminationStack<T, N, SLOTS, B>
{
    fn default() -> Self {
        Self::with_config(EliminationConfig::default())
    }
}

impl<T, const N: usize, const SLOTS: usize, B: Backoff> EliminationStack<T, N, SLOTS, B> {
    /// Creates a new, empty stack with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty stack.
    pub fn with_config(config: EliminationConfig) -> Self {
        tracing::trace!(
            capacity = N,
            slots = SLOTS,
            direct_attempts = config.direct_attempts,
            rendezvous_spins = config.rendezvous_spins,
            "elimination stack created"
        );
        Self {
            inner: TreiberStack::new(),
            slots: EliminationArray::new(),
            config,
            eliminated: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// The configuration this stack was built with.
    pub fn config(&self) -> EliminationConfig {
        self.config
    }

    /// Maximum number of values the stack can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Snapshot of the stack's counters.
    pub fn stats(&self) -> EliminationStats {
        EliminationStats {
            eliminated: self.eliminated.load(Ordering::Relaxed),
        }
    }

    /// Pushes a value on top of the stack.
    ///
    /// Fails only when all `N` nodes are in use.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let pool = self.inner.pool();
        let Some(index) = pool.acquire::<B>() else {
            return Err(Full(value));
        };
        // SAFETY: `index` was just acquired and is not reachable by anyone else.
        unsafe { pool.write(index, value) };
        self.push_node(index);
        Ok(())
    }

    /// Builds a value in a free node with `make` and pushes it.
    ///
    /// Returns `false` without calling `make` if the stack is full.
    pub fn emplace_with<F: FnOnce() -> T>(&self, make: F) -> bool {
        let pool = self.inner.pool();
        let Some(index) = pool.acquire::<B>() else {
            return false;
        };
        // SAFETY: as in `push`.
        unsafe { pool.write_with::<B>(index, make) };
        self.push_node(index);
        true
    }

    /// Attempts to pop the top element from the stack.
    ///
    /// Returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let mut backoff = B::default();
        for _ in 0..self.config.direct_attempts {
            match self.inner.try_pop() {
                // SAFETY: `try_pop` unlinked `index`, so we own it.
                Ok(Some(index)) => return Some(unsafe { self.inner.take(index) }),
                // Nothing to pop from the head, but a pusher may still show up in the array.
                Ok(None) => break,
                Err(()) => backoff.pause(),
            }
        }

        if let Some(index) = self.slots.try_receive::<B>(self.config.rendezvous_spins) {
            let _ = self.eliminated.fetch_add(1, Ordering::Relaxed);
            // SAFETY: the pusher handed `index` over to us through the slot.
            return Some(unsafe { self.inner.take(index) });
        }

        self.inner.pop()
    }

    /// Returns `true` if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn push_node(&self, index: u32) {
        let mut backoff = B::default();
        for _ in 0..self.config.direct_attempts {
            if self.inner.try_push(index).is_ok() {
                return;
            }
            backoff.pause();
        }

        if self.slots.try_hand_off(index) {
            return;
        }

        self.inner.push_node(index);
    }
}

impl<T, const N: usize, const SLOTS: usize, B: Backoff> Drop for EliminationStack<T, N, SLOTS, B> {
    fn drop(&mut self) {
        for index in self.slots.drain() {
            // SAFETY: a node left in a slot was handed over by a pusher and never claimed.
            drop(unsafe { self.inner.take(index) });
        }
        // `inner` drops the values still on the stack.
    }
}

impl<T, const N: usize, const SLOTS: usize, B: Backoff> fmt::Debug
    for EliminationStack<T, N, SLOTS, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EliminationStack")
            .field("inner", &self.inner)
            .field("slots", &self.slots)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
