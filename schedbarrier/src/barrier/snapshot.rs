use serde::Serialize;

use super::bank::BankState;
use super::registry::BarrierSlot;
use super::{BarrierState, KindMasks, MemberEntry};
use crate::def::BANK_COUNT;
use crate::utils::mask::MemberMask;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BankSnapshot {
    pub masks: KindMasks,
    pub flags: KindMasks,
    pub waiting: KindMasks,
    pub generation: u64,
}

impl From<&BankState> for BankSnapshot {
    fn from(state: &BankState) -> Self {
        Self {
            masks: state.masks,
            flags: state.flags,
            waiting: state.waiting,
            generation: state.generation,
        }
    }
}

/// Point-in-time copy of one barrier, as seen by inspection tools.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BarrierSnapshot {
    pub index: usize,
    pub name: String,
    pub state: BarrierState,
    pub wait_if_alone: bool,
    pub member_count: usize,
    /// Union of both banks' scheduler masks.
    pub scheduler_mask: MemberMask,
    /// Union of both banks' process masks.
    pub process_mask: MemberMask,
    pub banks: [BankSnapshot; BANK_COUNT],
    pub pending_add: [KindMasks; BANK_COUNT],
    pub pending_remove: [KindMasks; BANK_COUNT],
    pub switch: usize,
    pub wait_on_counter: u64,
    pub members: Vec<MemberEntry>,
}

impl BarrierSnapshot {
    /// Copies the slot and locks each bank in turn. Called with the registry
    /// lock held and no bank lock held.
    pub(crate) fn capture(slot: &BarrierSlot) -> Self {
        let barrier = &slot.barrier;
        Self::assemble(
            slot,
            std::array::from_fn(|i| BankSnapshot::from(&*barrier.bank(i).state.lock())),
        )
    }

    /// Like [`Self::capture`], for a caller that holds the registry lock and
    /// the lock of bank `held_idx`, whose state is `held`.
    pub(crate) fn capture_holding(slot: &BarrierSlot, held_idx: usize, held: &BankState) -> Self {
        let barrier = &slot.barrier;
        Self::assemble(
            slot,
            std::array::from_fn(|i| {
                if i == held_idx {
                    BankSnapshot::from(held)
                } else {
                    BankSnapshot::from(&*barrier.bank(i).state.lock())
                }
            }),
        )
    }

    /// Replaces bank `idx` with a copy taken earlier under that bank's lock.
    pub(crate) fn with_bank(mut self, idx: usize, bank: BankSnapshot) -> Self {
        self.banks[idx] = bank;
        let union = self.banks[0].masks.union(&self.banks[1].masks);
        self.scheduler_mask = union.scheduler;
        self.process_mask = union.process;
        self
    }

    fn assemble(slot: &BarrierSlot, banks: [BankSnapshot; BANK_COUNT]) -> Self {
        let barrier = &slot.barrier;
        let union = banks[0].masks.union(&banks[1].masks);
        Self {
            index: barrier.index(),
            name: barrier.name().to_owned(),
            state: slot.state,
            wait_if_alone: barrier.wait_if_alone(),
            member_count: slot.members.len(),
            scheduler_mask: union.scheduler,
            process_mask: union.process,
            banks,
            pending_add: slot.pending_add,
            pending_remove: slot.pending_remove,
            switch: barrier.switch(),
            wait_on_counter: barrier.wait_on_counter(),
            members: slot.members.to_vec(),
        }
    }

    /// True when every bank's flags lie inside that bank's masks.
    pub fn masks_contain_flags(&self) -> bool {
        self.banks.iter().all(|b| b.flags.is_subset_of(&b.masks))
    }
}
