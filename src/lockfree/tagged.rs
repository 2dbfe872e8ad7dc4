//! Tagged arena indices.
//!
//! A [`TaggedIndex`] pairs a node index with a generation tag. Both halves live in one `u64` so
//! they are loaded and compare-and-swapped as a single unit: a CAS that expects `(n, t)` fails
//! once anyone has installed `(n, t')` in the meantime, even if the index is the same (ABA).

use crate::sync::{AtomicU64, Ordering};

/// Index value meaning "no node".
pub(crate) const NIL: u32 = u32::MAX;

/// Index value marking a popper waiting in an elimination slot. Never a valid node index.
pub(crate) const OFFER: u32 = u32::MAX - 1;

/// Largest node count a pool can hold; the remaining index values are reserved.
pub(crate) const MAX_NODES: usize = OFFER as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaggedIndex {
    pub(crate) index: u32,
    pub(crate) tag: u32,
}

impl TaggedIndex {
    pub(crate) const fn new(index: u32, tag: u32) -> Self {
        Self { index, tag }
    }

    pub(crate) const fn null() -> Self {
        Self::new(NIL, 0)
    }

    pub(crate) const fn is_null(self) -> bool {
        self.index == NIL
    }

    /// The node index, or `None` if null.
    pub(crate) fn get(self) -> Option<u32> {
        (self.index != NIL).then_some(self.index)
    }

    /// `index` with the tag advanced past `self`. Used as the new value of every successful CAS.
    pub(crate) const fn successor(self, index: u32) -> Self {
        Self::new(index, self.tag.wrapping_add(1))
    }

    const fn pack(self) -> u64 {
        ((self.tag as u64) << 32) | self.index as u64
    }

    const fn unpack(raw: u64) -> Self {
        Self::new(raw as u32, (raw >> 32) as u32)
    }
}

/// An atomic [`TaggedIndex`].
#[derive(Debug)]
pub(crate) struct AtomicTagged {
    raw: AtomicU64,
}

impl AtomicTagged {
    pub(crate) fn new(value: TaggedIndex) -> Self {
        Self {
            raw: AtomicU64::new(value.pack()),
        }
    }

    pub(crate) fn load(&self, order: Ordering) -> TaggedIndex {
        TaggedIndex::unpack(self.raw.load(order))
    }

    pub(crate) fn store(&self, value: TaggedIndex, order: Ordering) {
        self.raw.store(value.pack(), order);
    }

    pub(crate) fn compare_exchange(
        &self,
        current: TaggedIndex,
        new: TaggedIndex,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedIndex, TaggedIndex> {
        self.raw
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(TaggedIndex::unpack)
            .map_err(TaggedIndex::unpack)
    }

    pub(crate) fn compare_exchange_weak(
        &self,
        current: TaggedIndex,
        new: TaggedIndex,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedIndex, TaggedIndex> {
        self.raw
            .compare_exchange_weak(current.pack(), new.pack(), success, failure)
            .map(TaggedIndex::unpack)
            .map_err(TaggedIndex::unpack)
    }
}
