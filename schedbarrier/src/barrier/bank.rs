use parking_lot::{Condvar, Mutex};

use super::KindMasks;
use crate::member::Member;

/// One of the two inner barriers of a [`super::Barrier`].
pub(crate) struct Bank {
    pub(crate) state: Mutex<BankState>,
    pub(crate) cond: Condvar,
}

impl Bank {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BankState::default()),
            cond: Condvar::new(),
        }
    }
}

/// Result of re-checking a bank after its masks shrank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Settle {
    /// Nothing to release.
    Idle,
    /// The members that already arrived now satisfy the bank; it was released.
    Released,
}

/// Everything guarded by a bank's mutex.
///
/// Invariants, upheld by every method:
/// - `flags` is a subset of `masks`
/// - `evicted` is a subset of `waiting`
/// - `generation` changes exactly when `flags` is cleared by a release
#[derive(Debug, Default, Clone)]
pub(crate) struct BankState {
    /// Members that must arrive before the bank releases.
    pub(crate) masks: KindMasks,
    /// Members that arrived since the last release.
    pub(crate) flags: KindMasks,
    /// Members sleeping on the condition variable.
    pub(crate) waiting: KindMasks,
    /// Sleeping members removed by emergency cleanup.
    pub(crate) evicted: KindMasks,
    pub(crate) generation: u64,
}

impl BankState {
    /// ORs the member's bit into the flags. A bit outside the mask is ignored.
    pub(crate) fn contribute(&mut self, member: Member) {
        if self.masks.contains(member) {
            self.flags.insert(member);
        }
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.masks.is_subset_of(&self.flags)
    }

    /// True when `member`'s bit is the only flag set across both kinds.
    pub(crate) fn is_lone(&self, member: Member) -> bool {
        self.flags == KindMasks::of(member)
    }

    /// Clears both flag words and starts a new generation.
    pub(crate) fn release(&mut self) {
        self.flags = KindMasks::default();
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn add_masks(&mut self, added: &KindMasks) {
        self.masks = self.masks.union(added);
    }

    /// Drops `removed` from masks and flags. Returns the bits that were
    /// required, i.e. the members that departed from the bank.
    pub(crate) fn remove_masks(&mut self, removed: &KindMasks) -> KindMasks {
        let departed = self.masks.intersection(removed);
        self.masks = self.masks.difference(removed);
        self.flags = self.flags.difference(removed);
        departed
    }

    /// Marks a sleeping member as evicted. Returns false if it was not sleeping.
    pub(crate) fn evict(&mut self, member: Member) -> bool {
        if self.waiting.contains(member) {
            self.evicted.insert(member);
            true
        } else {
            false
        }
    }

    /// Re-checks satisfaction after the members in `departed` left.
    ///
    /// A departed member counts as arrived for the round in flight, so peers
    /// that only waited for it are released. A bank nobody arrived at stays
    /// idle, and with `wait_if_alone` a round with a single contribution is
    /// not released.
    pub(crate) fn settle(&mut self, wait_if_alone: bool, departed: &KindMasks) -> Settle {
        if self.flags.is_empty() {
            return Settle::Idle;
        }
        if wait_if_alone && self.flags.count() + departed.count() == 1 {
            return Settle::Idle;
        }
        if self.is_satisfied() {
            self.release();
            return Settle::Released;
        }
        Settle::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{ProcessId, SchedulerId};

    fn p(slot: usize) -> Member {
        Member::from(ProcessId::new(slot).unwrap())
    }

    fn s(slot: usize) -> Member {
        Member::from(SchedulerId::new(slot).unwrap())
    }

    fn bank_with(members: &[Member]) -> BankState {
        let mut state = BankState::default();
        for m in members {
            state.masks.insert(*m);
        }
        state
    }

    #[test]
    fn test_contribute_masked() {
        let mut state = bank_with(&[p(0), s(0)]);
        state.contribute(p(1));
        assert!(state.flags.is_empty());
        state.contribute(p(0));
        assert!(!state.is_satisfied());
        state.contribute(s(0));
        assert!(state.is_satisfied());
        assert!(state.flags.is_subset_of(&state.masks));
    }

    #[test]
    fn test_release_bumps_generation() {
        let mut state = bank_with(&[p(0)]);
        state.contribute(p(0));
        let generation = state.generation;
        state.release();
        assert!(state.flags.is_empty());
        assert_ne!(generation, state.generation);
    }

    #[test]
    fn test_is_lone() {
        let mut state = bank_with(&[p(0), p(1), s(0)]);
        state.contribute(p(0));
        assert!(state.is_lone(p(0)));
        state.contribute(s(0));
        assert!(!state.is_lone(p(0)));
    }

    #[test]
    fn test_settle_after_removal() {
        let mut state = bank_with(&[p(0), p(1)]);
        state.contribute(p(0));
        assert_eq!(Settle::Idle, state.settle(false, &KindMasks::default()));
        let departed = state.remove_masks(&KindMasks::of(p(1)));
        assert_eq!(KindMasks::of(p(1)), departed);
        assert_eq!(Settle::Released, state.settle(false, &departed));
        assert!(state.flags.is_empty());
    }

    #[test]
    fn test_departed_member_counts_under_wait_if_alone() {
        let mut state = bank_with(&[p(0), p(1)]);
        state.contribute(p(0));
        let departed = state.remove_masks(&KindMasks::of(p(1)));
        assert_eq!(Settle::Released, state.settle(true, &departed));
        assert_eq!(1, state.generation);
    }

    #[test]
    fn test_settle_keeps_lone_member_waiting() {
        let mut state = bank_with(&[p(0)]);
        state.contribute(p(0));
        // p(2) was never folded into this bank, so nobody departed
        let departed = state.remove_masks(&KindMasks::of(p(2)));
        assert!(departed.is_empty());
        assert_eq!(Settle::Idle, state.settle(true, &departed));
        assert!(!state.flags.is_empty());
    }

    #[test]
    fn test_settle_idle_bank() {
        let mut state = bank_with(&[p(0), p(1)]);
        let departed = state.remove_masks(&KindMasks::of(p(1)));
        assert_eq!(Settle::Idle, state.settle(false, &departed));
        assert_eq!(0, state.generation);
    }

    #[test]
    fn test_evict_only_sleepers() {
        let mut state = bank_with(&[p(0)]);
        assert!(!state.evict(p(0)));
        state.waiting.insert(p(0));
        assert!(state.evict(p(0)));
        assert!(state.evicted.contains(p(0)));
    }
}
