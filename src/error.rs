//! Error types.

use core::fmt;

/// The container was at capacity; the rejected value is handed back.
///
/// Being full is an expected steady-state condition, not a failure of the container. Whether to
/// drop the value or retry is up to the caller.
#[derive(Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("container is at capacity")]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be stored.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}
