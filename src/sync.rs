//! Atomic types used by the containers.
//!
//! Compiled against `loom` when the `check-loom` feature is enabled so that the model tests can
//! explore every interleaving of the CAS loops.

#[cfg(not(feature = "check-loom"))]
pub(crate) use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
#[cfg(feature = "check-loom")]
pub(crate) use loom::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
