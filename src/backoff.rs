//! Backoff strategies for CAS retry loops.
//!
//! Every container creates a fresh strategy per operation and calls [`Backoff::pause`] after a
//! failed compare-and-swap. Strategies only burn CPU time; they never park the thread.

use core::fmt;

/// Upper bound on the number of relax hints issued by a single [`SpinBackoff::pause`].
pub const SPIN_LIMIT: u32 = 1024;

/// A contention-mitigation strategy.
pub trait Backoff: Default {
    /// Waits a little before the caller retries.
    fn pause(&mut self);

    /// Returns the strategy to its initial (shortest) delay.
    fn reset(&mut self);
}

/// Exponential spin-wait.
///
/// Each [`pause`](Backoff::pause) issues `count` CPU relax hints and then doubles `count`, up to
/// [`SPIN_LIMIT`].
#[derive(Debug, Clone)]
pub struct SpinBackoff {
    count: u32,
}

impl Default for SpinBackoff {
    fn default() -> Self {
        Self { count: 1 }
    }
}

impl SpinBackoff {
    /// Creates a backoff with the shortest delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of relax hints the next `pause` will issue.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Backoff for SpinBackoff {
    fn pause(&mut self) {
        cfg_if::cfg_if! {
            if #[cfg(feature = "check-loom")] {
                // loom only needs to see that the thread yields.
                loom::thread::yield_now();
            } else {
                for _ in 0..self.count {
                    cpu_relax();
                }
            }
        }
        if self.count < SPIN_LIMIT {
            self.count *= 2;
        }
    }

    fn reset(&mut self) {
        self.count = 1;
    }
}

/// Issues the architecture's spin-wait hint (`pause` on x86, `yield` on ARM), or yields the
/// thread to the OS scheduler where no such instruction exists.
#[inline]
pub fn cpu_relax() {
    cfg_if::cfg_if! {
        if #[cfg(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "arm",
            target_arch = "aarch64"
        ))] {
            core::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }
}

/// Spins for a while, then starts yielding to the OS scheduler.
///
/// Thin adapter over [`crossbeam_utils::Backoff::snooze`]. Better suited than [`SpinBackoff`]
/// when there are more threads than cores. Not visible to `loom`.
#[derive(Default)]
pub struct Snooze {
    inner: crossbeam_utils::Backoff,
}

impl Snooze {
    /// Creates a fresh snooze backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the backoff has escalated to yielding.
    pub fn is_yielding(&self) -> bool {
        self.inner.is_completed()
    }
}

impl Backoff for Snooze {
    fn pause(&mut self) {
        self.inner.snooze();
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

impl fmt::Debug for Snooze {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snooze")
            .field("yielding", &self.is_yielding())
            .finish()
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod test {
    use super::*;

    #[test]
    fn spin_doubles_until_limit() {
        let mut backoff = SpinBackoff::new();
        assert_eq!(backoff.count(), 1);
        backoff.pause();
        assert_eq!(backoff.count(), 2);
        for _ in 0..20 {
            backoff.pause();
        }
        assert_eq!(backoff.count(), SPIN_LIMIT);
        backoff.reset();
        assert_eq!(backoff.count(), 1);
    }

    #[test]
    fn snooze_escalates() {
        let mut backoff = Snooze::new();
        while !backoff.is_yielding() {
            backoff.pause();
        }
        backoff.reset();
        assert!(!backoff.is_yielding());
    }
}
