#![cfg(not(feature = "check-loom"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::scope;

use bounded_lockfree::{EliminationConfig, EliminationStack, EliminationStats, Full, ELIM_SIZE};

#[test]
fn defaults() {
    let stack = EliminationStack::<u32, 16>::new();
    assert_eq!(stack.config(), EliminationConfig::default());
    assert_eq!(stack.config().direct_attempts, 5);
    assert_eq!(stack.config().rendezvous_spins, 5);
    assert_eq!(stack.capacity(), 16);
    assert_eq!(ELIM_SIZE, 8);
}

#[test]
fn sequential_lifo_never_eliminates() {
    let stack = EliminationStack::<u32, 4>::new();
    for v in 0..4 {
        stack.push(v).unwrap();
    }
    assert_eq!(stack.push(4), Err(Full(4)));
    let popped: Vec<_> = std::iter::from_fn(|| stack.pop()).collect();
    assert_eq!(popped, [3, 2, 1, 0]);
    assert_eq!(stack.stats().eliminated, 0);
}

/// Threads alternate push and pop. Returns the stack's counters once every value pushed has been
/// accounted for exactly once.
fn storm<const SLOTS: usize>(config: EliminationConfig, ops: usize) -> EliminationStats {
    const THREADS: usize = 8;

    let stack = EliminationStack::<usize, 1024, SLOTS>::with_config(config);
    let (tx, rx) = crossbeam_channel::unbounded();

    scope(|s| {
        for t in 0..THREADS {
            let tx = tx.clone();
            let stack = &stack;
            s.spawn(move || {
                let mut pushed = Vec::new();
                let mut popped = Vec::new();
                for i in 0..ops {
                    if (t + i) % 2 == 0 {
                        let v = t * ops + i;
                        if stack.push(v).is_ok() {
                            pushed.push(v);
                        }
                    } else if let Some(v) = stack.pop() {
                        popped.push(v);
                    }
                }
                tx.send((pushed, popped)).unwrap();
            });
        }
    });
    drop(tx);

    let (pushed, popped): (Vec<Vec<usize>>, Vec<Vec<usize>>) = rx.iter().unzip();
    let mut pushed: Vec<usize> = pushed.into_iter().flatten().collect();
    let mut out: Vec<usize> = popped.into_iter().flatten().collect();
    let popped = out.len();
    while let Some(v) = stack.pop() {
        out.push(v);
    }

    let stats = stack.stats();
    assert!(stats.eliminated <= popped);

    // What came out is exactly what went in: nothing lost, duplicated or made up.
    pushed.sort_unstable();
    out.sort_unstable();
    assert_eq!(out, pushed);
    stats
}

#[test]
fn storm_default_config() {
    let _ = storm::<ELIM_SIZE>(EliminationConfig::default(), 50_000);
}

#[test]
fn storm_elimination_first() {
    // No direct attempts and a single slot: every operation meets the elimination array first.
    let config = EliminationConfig::default()
        .direct_attempts(0)
        .rendezvous_spins(64);
    let stats = storm::<1>(config, 10_000);
    assert!(stats.eliminated > 0);
}

#[test]
fn drop_releases_remaining() {
    struct Counted<'a>(&'a AtomicUsize);
    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            let _ = self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let drops = AtomicUsize::new(0);
    {
        let stack = EliminationStack::<Counted<'_>, 8>::new();
        for _ in 0..5 {
            stack.push(Counted(&drops)).unwrap();
        }
        drop(stack.pop());
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
    assert_eq!(drops.load(Ordering::Relaxed), 5);
}
