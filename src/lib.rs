//! Bounded lock-free containers.
//!
//! - [`RingQueue`]: a bounded multi-producer multi-consumer FIFO queue.
//! - [`TreiberStack`]: a bounded LIFO stack over a fixed node pool.
//! - [`EliminationStack`]: a [`TreiberStack`] that lets colliding pushes and pops cancel out.
//!
//! All containers have their capacity fixed at compile time and never allocate after
//! construction. Contention is handled by a [`Backoff`] strategy chosen through a type parameter.

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::result_unit_err)]
#![deny(warnings, unsafe_op_in_unsafe_fn)]

pub mod backoff;
pub mod error;
pub mod lockfree;
mod sync;

pub use backoff::{Backoff, Snooze, SpinBackoff};
pub use error::Full;
pub use lockfree::{
    EliminationConfig, EliminationStack, EliminationStats, RingQueue, TreiberStack, ELIM_SIZE,
};

static_assertions::assert_impl_all!(RingQueue<String, 8>: Send, Sync);
static_assertions::assert_impl_all!(TreiberStack<String, 8>: Send, Sync);
static_assertions::assert_impl_all!(EliminationStack<String, 8>: Send, Sync);
static_assertions::assert_not_impl_any!(RingQueue<std::rc::Rc<u8>, 8>: Send, Sync);
