//! Lock-free data structures.

mod elim_stack;
mod pool;
mod queue;
mod stack;
mod tagged;

pub use elim_stack::{EliminationConfig, EliminationStack, EliminationStats, ELIM_SIZE};
pub use queue::RingQueue;
pub use stack::TreiberStack;
