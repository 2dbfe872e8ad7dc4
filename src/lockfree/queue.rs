//! Bounded multi-producer multi-consumer ring queue.
//!
//! Usable with any number of producers and consumers.
//!
//! Every slot carries a sequence number that tells producers and consumers whose turn it is:
//! slot `i` starts at `i`; a producer that claimed position `pos` publishes the value by storing
//! `pos + 1`, and the consumer that takes it hands the slot to the next lap by storing `pos + N`.
//! The positions are free-running counters and only wrap at integer overflow.
//!
//! Dmitry Vyukov.  Bounded MPMC queue.
//! <https://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue>

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};

use crossbeam_utils::CachePadded;

use crate::backoff::{Backoff, SpinBackoff};
use crate::error::Full;
use crate::sync::{AtomicUsize, Ordering};

/// Bounded MPMC queue with `N` slots. `N` must be a power of two.
///
/// `push` and `pop` never block: a full or empty queue is reported immediately, and layering a
/// wait on top is up to the caller.
pub struct RingQueue<T, const N: usize, B: Backoff = SpinBackoff> {
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
    buffer: Box<[CachePadded<Slot<T>>]>,
    _backoff: PhantomData<B>,
}

struct Slot<T> {
    sequence: AtomicUsize,

    /// Initialized iff `sequence == pos + 1` for the position that last claimed this slot.
    data: UnsafeCell<MaybeUninit<T>>,
}

// A value is only ever touched by the single thread that won its slot, so no need for `T: Sync`.
unsafe impl<T: Send, const N: usize, B: Backoff> Send for RingQueue<T, N, B> {}
unsafe impl<T: Send, const N: usize, B: Backoff> Sync for RingQueue<T, N, B> {}

impl<T, const N: usize, B: Backoff> Default for RingQueue<T, N, B> {
    fn default() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;

        let buffer = (0..N)
            .map(|i| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(i),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect();

        tracing::trace!(capacity = N, "ring queue created");

        Self {
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            _backoff: PhantomData,
        }
    }
}

impl<T, const N: usize, B: Backoff> RingQueue<T, N, B> {
    const CAPACITY_OK: () = {
        assert!(N > 0, "capacity must be non-zero");
        assert!(N.is_power_of_two(), "capacity must be a power of two");
        assert!(N <= isize::MAX as usize, "capacity must fit in an isize");
    };

    const MASK: usize = N - 1;

    /// Creates a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Appends `value` to the back of the queue.
    ///
    /// Returns `Err(Full(value))` if every slot is occupied.
    pub fn push(&self, value: T) -> Result<(), Full<T>> {
        let Some((slot, pos)) = self.claim_enqueue() else {
            return Err(Full(value));
        };
        // SAFETY: winning the CAS on `enqueue_pos` gives us exclusive access to the slot until
        // we publish it.
        unsafe { (*slot.data.get()).write(value) };
        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Constructs a value directly in the next free slot.
    ///
    /// `make` is only called once a slot has been claimed, so nothing is built when the queue is
    /// full. Returns `false` in that case.
    ///
    /// # Aborts
    ///
    /// A claimed slot cannot be handed back, so the process is aborted if `make` panics.
    pub fn emplace_with<F: FnOnce() -> T>(&self, make: F) -> bool {
        let Some((slot, pos)) = self.claim_enqueue() else {
            return false;
        };
        let bomb = AbortOnUnwind;
        let value = make();
        mem::forget(bomb);
        // SAFETY: see `push`.
        unsafe { (*slot.data.get()).write(value) };
        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
        true
    }

    /// Removes the value at the front of the queue.
    ///
    /// Returns `None` if the queue is observed to be empty.
    pub fn pop(&self) -> Option<T> {
        let mut backoff = B::default();
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        let slot = loop {
            let slot = &self.buffer[pos & Self::MASK];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break slot,
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                // The producer for this lap has not published yet.
                return None;
            } else {
                // Another consumer already took this slot.
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
            backoff.pause();
        };

        // SAFETY: the acquire load of `sequence == pos + 1` synchronizes with the producer's
        // release store, and winning the CAS makes us the only reader.
        let value = unsafe { (*slot.data.get()).assume_init_read() };
        slot.sequence.store(pos.wrapping_add(N), Ordering::Release);
        Some(value)
    }

    /// Number of values in the queue.
    ///
    /// A snapshot; only exact when no other thread is pushing or popping.
    pub fn len(&self) -> usize {
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        // `head` is read first, so `tail` can only have run further ahead.
        tail.wrapping_sub(head).min(N)
    }

    /// Returns `true` if the queue is observed to be empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is observed to be full.
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Claims the slot at the current enqueue position.
    fn claim_enqueue(&self) -> Option<(&Slot<T>, usize)> {
        let mut backoff = B::default();
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let slot: &Slot<T> = &self.buffer[pos & Self::MASK];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some((slot, pos)),
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                // The slot still holds the value from the previous lap.
                return None;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
            backoff.pause();
        }
    }
}

impl<T, const N: usize, B: Backoff> Drop for RingQueue<T, N, B> {
    fn drop(&mut self) {
        let mut front = self.dequeue_pos.load(Ordering::Relaxed);
        let back = self.enqueue_pos.load(Ordering::Relaxed);
        let mut dropped = 0usize;

        while front != back {
            let slot = &mut self.buffer[front & Self::MASK];
            if slot.sequence.load(Ordering::Acquire) == front.wrapping_add(1) {
                // SAFETY: published and never consumed, and we have `&mut self`.
                unsafe { slot.data.get_mut().assume_init_drop() };
                dropped += 1;
            }
            front = front.wrapping_add(1);
        }

        if dropped > 0 {
            tracing::debug!(dropped, "ring queue dropped with pending values");
        }
    }
}

impl<T, const N: usize, B: Backoff> fmt::Debug for RingQueue<T, N, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

/// Aborts the process if dropped during unwinding.
struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        std::process::abort();
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod test {
    use super::*;
    use crate::backoff::Snooze;
    use std::thread::scope;

    const CONC_COUNT: i64 = 1_000_000;

    #[test]
    fn push_pop_1() {
        let q: RingQueue<i64, 4> = RingQueue::new();
        assert!(q.is_empty());
        q.push(37).unwrap();
        assert!(!q.is_empty());
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(37));
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_pop_many_seq() {
        let q: RingQueue<i64, 256> = RingQueue::new();
        for i in 0..200 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 200);
        for i in 0..200 {
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn full_returns_value() {
        let q: RingQueue<String, 2> = RingQueue::new();
        q.push("a".to_string()).unwrap();
        q.push("b".to_string()).unwrap();
        assert!(q.is_full());
        let err = q.push("c".to_string()).unwrap_err();
        assert_eq!(err.into_inner(), "c");
        assert!(!q.emplace_with(|| unreachable!("queue is full")));

        assert_eq!(q.pop().as_deref(), Some("a"));
        assert!(q.emplace_with(|| "d".to_string()));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert_eq!(q.pop().as_deref(), Some("d"));
    }

    #[test]
    fn wraps_many_laps() {
        let q: RingQueue<usize, 4> = RingQueue::new();
        for lap in 0..1000 {
            for i in 0..3 {
                q.push(lap * 3 + i).unwrap();
            }
            for i in 0..3 {
                assert_eq!(q.pop(), Some(lap * 3 + i));
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn drop_pending() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let q: RingQueue<Counted, 8> = RingQueue::new();
        for _ in 0..6 {
            assert!(q.push(Counted(drops.clone())).is_ok());
        }
        drop(q.pop());
        drop(q);
        assert_eq!(drops.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn push_pop_many_spsc() {
        let q: RingQueue<i64, 64, Snooze> = RingQueue::new();

        scope(|scope| {
            scope.spawn(|| {
                let mut next = 0;
                while next < CONC_COUNT {
                    if let Some(elem) = q.pop() {
                        assert_eq!(elem, next);
                        next += 1;
                    }
                }
            });

            for i in 0..CONC_COUNT {
                let mut v = i;
                while let Err(Full(back)) = q.push(v) {
                    v = back;
                }
            }
        });
        assert!(q.is_empty());
    }

    #[test]
    fn push_pop_many_spmc() {
        fn recv(q: &RingQueue<i64, 128>, total: &AtomicUsize) -> usize {
            let mut cur = -1;
            let mut count = 0;
            while total.load(Ordering::Relaxed) < CONC_COUNT as usize {
                if let Some(elem) = q.pop() {
                    assert!(elem > cur);
                    cur = elem;
                    count += 1;
                    let _ = total.fetch_add(1, Ordering::Relaxed);
                }
            }
            count
        }

        let q: RingQueue<i64, 128> = RingQueue::new();
        let total = AtomicUsize::new(0);
        let received: usize = scope(|scope| {
            let receivers: Vec<_> = (0..3)
                .map(|_| scope.spawn(|| recv(&q, &total)))
                .collect();

            scope.spawn(|| {
                for i in 0..CONC_COUNT {
                    let mut v = i;
                    while let Err(Full(back)) = q.push(v) {
                        v = back;
                    }
                }
            });

            receivers.into_iter().map(|r| r.join().unwrap()).sum()
        });

        assert_eq!(received, CONC_COUNT as usize);
        assert!(q.is_empty());
    }
}
