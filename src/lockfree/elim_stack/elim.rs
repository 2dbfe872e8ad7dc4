use core::fmt;

use crossbeam_utils::CachePadded;
#[cfg(not(feature = "check-loom"))]
use rand::Rng;

use crate::backoff::Backoff;
use crate::lockfree::tagged::{AtomicTagged, TaggedIndex, NIL, OFFER};
use crate::sync::Ordering;

/// Decoded state of an elimination slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Empty,
    /// A popper is waiting for a pusher.
    Offering,
    /// A pusher handed over this node; the first popper to clear the slot owns it.
    Holding(u32),
}

impl SlotState {
    fn of(word: TaggedIndex) -> Self {
        match word.index {
            NIL => Self::Empty,
            OFFER => Self::Offering,
            index => Self::Holding(index),
        }
    }
}

/// Side array where a push and a pop can meet and cancel out.
///
/// Every transition of a slot bumps its tag, so a popper can tell its own offering apart from a
/// later offering of another popper in the same slot.
pub(crate) struct EliminationArray<const SLOTS: usize> {
    slots: [CachePadded<AtomicTagged>; SLOTS],
}

impl<const SLOTS: usize> EliminationArray<SLOTS> {
    const SLOTS_OK: () = assert!(SLOTS > 0, "elimination array needs at least one slot");

    pub(crate) fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SLOTS_OK;
        Self {
            slots: core::array::from_fn(|_| {
                CachePadded::new(AtomicTagged::new(TaggedIndex::null()))
            }),
        }
    }

    /// Picks the slot for one elimination attempt: uniformly at random on every call, so two
    /// threads never stay aliased to the same slot.
    #[cfg(not(feature = "check-loom"))]
    fn pick(&self) -> &AtomicTagged {
        &self.slots[rand::thread_rng().gen_range(0..SLOTS)]
    }

    /// Model runs must be deterministic.
    #[cfg(feature = "check-loom")]
    fn pick(&self) -> &AtomicTagged {
        &self.slots[0]
    }

    /// Hands the owned, initialized node `index` to a popper waiting in a random slot.
    ///
    /// Returns `false` if the slot had no waiting popper or another pusher got there first.
    pub(crate) fn try_hand_off(&self, index: u32) -> bool {
        let slot = self.pick();
        let current = slot.load(Ordering::Relaxed);
        if SlotState::of(current) != SlotState::Offering {
            return false;
        }
        // Release: the popper reads the payload after acquiring the slot.
        slot.compare_exchange(
            current,
            current.successor(index),
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .is_ok()
    }

    /// Tries to receive a node from a pusher through a random slot.
    ///
    /// Claims a node that is already waiting in the slot. Otherwise, if the slot is empty, offers
    /// to pop and waits for up to `spins` backoff rounds. On success the returned node is owned
    /// by the caller.
    pub(crate) fn try_receive<B: Backoff>(&self, spins: usize) -> Option<u32> {
        let slot = self.pick();
        let current = slot.load(Ordering::Acquire);
        match SlotState::of(current) {
            SlotState::Holding(index) => return Self::claim(slot, current, index),
            SlotState::Offering => return None,
            SlotState::Empty => {}
        }

        let offer = current.successor(OFFER);
        if slot
            .compare_exchange(current, offer, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let mut backoff = B::default();
        for _ in 0..spins {
            backoff.pause();
            let seen = slot.load(Ordering::Acquire);
            if seen == offer {
                continue;
            }
            return match SlotState::of(seen) {
                SlotState::Holding(index) => Self::claim(slot, seen, index),
                // Our delivery was taken by another popper.
                _ => None,
            };
        }

        // Withdraw. A pusher may have arrived at the last moment; its node is ours then.
        match slot.compare_exchange(
            offer,
            offer.successor(NIL),
            Ordering::Relaxed,
            Ordering::Acquire,
        ) {
            Ok(_) => None,
            Err(seen) => match SlotState::of(seen) {
                SlotState::Holding(index) => Self::claim(slot, seen, index),
                _ => None,
            },
        }
    }

    fn claim(slot: &AtomicTagged, seen: TaggedIndex, index: u32) -> Option<u32> {
        slot.compare_exchange(
            seen,
            seen.successor(NIL),
            Ordering::Acquire,
            Ordering::Relaxed,
        )
        .ok()
        .map(|_| index)
    }

    /// Empties every slot and returns the nodes still held in them.
    pub(crate) fn drain(&mut self) -> Vec<u32> {
        let mut held = Vec::new();
        for slot in self.slots.iter() {
            let word = slot.load(Ordering::Acquire);
            if let SlotState::Holding(index) = SlotState::of(word) {
                held.push(index);
            }
            slot.store(word.successor(NIL), Ordering::Relaxed);
        }
        held
    }

    /// Puts `index` into the first slot as if a pusher had just handed it over.
    #[cfg(all(test, not(feature = "check-loom")))]
    pub(crate) fn park(&self, index: u32) {
        let word = self.slots[0].load(Ordering::Relaxed);
        self.slots[0].store(word.successor(index), Ordering::Release);
    }
}

impl<const SLOTS: usize> fmt::Debug for EliminationArray<SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.slots
                    .iter()
                    .map(|slot| SlotState::of(slot.load(Ordering::Relaxed))),
            )
            .finish()
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod test {
    use super::*;
    use crate::backoff::SpinBackoff;

    #[test]
    fn no_partner() {
        let array = EliminationArray::<1>::new();
        assert!(!array.try_hand_off(3));
        assert_eq!(array.try_receive::<SpinBackoff>(4), None);
        // The offering was withdrawn.
        assert_eq!(SlotState::of(array.slots[0].load(Ordering::Relaxed)), SlotState::Empty);
        assert!(!array.try_hand_off(3));
    }

    #[test]
    fn claim_waiting_node() {
        let mut array = EliminationArray::<1>::new();
        let offer = TaggedIndex::null().successor(OFFER);
        array.slots[0].store(offer, Ordering::Relaxed);

        assert!(array.try_hand_off(5));
        assert_eq!(
            SlotState::of(array.slots[0].load(Ordering::Relaxed)),
            SlotState::Holding(5)
        );
        // A popper that did not offer can still take it.
        assert_eq!(array.try_receive::<SpinBackoff>(0), Some(5));
        assert!(array.drain().is_empty());
    }

    #[test]
    fn drain_returns_held() {
        let mut array = EliminationArray::<2>::new();
        array.slots[1].store(TaggedIndex::new(9, 4), Ordering::Relaxed);
        assert_eq!(array.drain(), vec![9]);
        assert_eq!(format!("{:?}", array), "[Empty, Empty]");
    }
}
