use smallvec::SmallVec;
use std::sync::Arc;

use super::bank::BankState;
use super::{Barrier, BarrierState, KindMasks, MemberEntry};
use crate::def::{BANK_COUNT, MAX_BARRIER_NAME_LEN};
use crate::error::{BarrierError, Result};
use crate::member::{Member, MemberKind, SyncPhase, WaitMode};

/// Registry-side state of one barrier.
///
/// Pending masks are deltas not yet visible to the banks: a connect queues
/// the member's bit in `pending_add`, a disconnect in `pending_remove`.
/// Both are indexed by bank.
pub(crate) struct BarrierSlot {
    pub(crate) barrier: Arc<Barrier>,
    pub(crate) state: BarrierState,
    pub(crate) members: SmallVec<[MemberEntry; 8]>,
    pub(crate) pending_add: [KindMasks; BANK_COUNT],
    pub(crate) pending_remove: [KindMasks; BANK_COUNT],
}

impl BarrierSlot {
    fn new(index: usize, name: &str, wait_if_alone: bool) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(index, name, wait_if_alone)),
            state: BarrierState::Active,
            members: SmallVec::new(),
            pending_add: Default::default(),
            pending_remove: Default::default(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.barrier.name()
    }

    pub(crate) fn wait_mode(&self, member: Member, phase: SyncPhase) -> Option<WaitMode> {
        self.members
            .iter()
            .find(|e| e.member == member && e.phase == phase)
            .map(|e| e.mode)
    }

    pub(crate) fn has_member(&self, member: Member) -> bool {
        self.members.iter().any(|e| e.member == member)
    }

    fn uses_bank(&self, member: Member, bank: usize) -> bool {
        self.members
            .iter()
            .any(|e| e.member == member && e.phase.bank() == bank)
    }

    /// Appends a member entry and queues its bit for the bank of `phase`.
    pub(crate) fn attach(
        &mut self,
        member: Member,
        phase: SyncPhase,
        mode: WaitMode,
        capacity: usize,
    ) -> Result<()> {
        if self.wait_mode(member, phase).is_some() {
            return Err(BarrierError::AlreadyAssociated {
                member: member.to_string(),
                name: self.name().to_owned(),
                phase,
            });
        }
        if self.members.len() >= capacity {
            return Err(BarrierError::MemberTableFull {
                name: self.name().to_owned(),
                capacity,
            });
        }
        let bank = phase.bank();
        let already_required = self.uses_bank(member, bank);
        self.members.push(MemberEntry {
            member,
            phase,
            mode,
        });
        if !already_required {
            if self.pending_remove[bank].contains(member) {
                // a removal that was never folded: the bank still requires the bit
                self.pending_remove[bank].remove(member);
            } else {
                self.pending_add[bank].insert(member);
            }
        }
        Ok(())
    }

    /// Removes every entry of `member` and queues its bit for removal from
    /// the banks it used. Returns the number of entries removed.
    pub(crate) fn detach(&mut self, member: Member) -> usize {
        let before = self.members.len();
        let banks: SmallVec<[usize; BANK_COUNT]> = (0..BANK_COUNT)
            .filter(|&b| self.uses_bank(member, b))
            .collect();
        self.members.retain(|e| e.member != member);
        for bank in banks {
            if self.pending_add[bank].contains(member) {
                // never folded: the bank never saw the bit
                self.pending_add[bank].remove(member);
            } else {
                self.pending_remove[bank].insert(member);
            }
        }
        before - self.members.len()
    }

    /// Takes `member` out of the pending remove masks. Returns, per bank,
    /// whether the bit was pending there.
    pub(crate) fn take_pending_remove(&mut self, member: Member) -> [bool; BANK_COUNT] {
        let mut taken = [false; BANK_COUNT];
        for (bank, flag) in taken.iter_mut().enumerate() {
            if self.pending_remove[bank].contains(member) {
                self.pending_remove[bank].remove(member);
                *flag = true;
            }
        }
        taken
    }

    /// Moves the pending adds of `kind` into the bank's masks. Requires the
    /// bank lock, taken while the registry lock is held.
    pub(crate) fn fold_adds(
        &mut self,
        bank: usize,
        kind: MemberKind,
        state: &mut BankState,
    ) -> KindMasks {
        let mut added = KindMasks::default();
        *added.get_mut(kind) = self.pending_add[bank].get(kind);
        if !added.is_empty() {
            state.add_masks(&added);
            *self.pending_add[bank].get_mut(kind) = Default::default();
        }
        added
    }

    /// Moves all pending removes of `bank` out of the bank's masks and flags.
    /// Returns the members that were required by the bank.
    pub(crate) fn fold_removes(&mut self, bank: usize, state: &mut BankState) -> KindMasks {
        let removed = std::mem::take(&mut self.pending_remove[bank]);
        if removed.is_empty() {
            return removed;
        }
        state.remove_masks(&removed)
    }
}

/// Fixed-capacity table of barriers, guarded by the registry lock.
pub(crate) struct BarrierTable {
    slots: Vec<Option<BarrierSlot>>,
    max_members: usize,
}

impl BarrierTable {
    pub(crate) fn new(capacity: usize, max_members: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            max_members,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn max_members(&self) -> usize {
        self.max_members
    }

    pub(crate) fn add(&mut self, name: &str, wait_if_alone: bool) -> Result<usize> {
        if name.len() > MAX_BARRIER_NAME_LEN {
            return Err(BarrierError::NameTooLong(name.to_owned()));
        }
        if self.find(name).is_some() {
            return Err(BarrierError::DuplicateName(name.to_owned()));
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(BarrierError::RegistryFull(self.slots.len()))?;
        self.slots[index] = Some(BarrierSlot::new(index, name, wait_if_alone));
        Ok(index)
    }

    /// Deletes a memberless barrier and returns the slot index it occupied.
    pub(crate) fn delete(&mut self, name: &str) -> Result<usize> {
        let index = self
            .find(name)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        self.delete_at(index)?;
        Ok(index)
    }

    pub(crate) fn delete_at(&mut self, index: usize) -> Result<Arc<Barrier>> {
        match self.slots.get_mut(index).and_then(Option::take) {
            None => Err(BarrierError::UnknownBarrier(format!("#{}", index))),
            Some(slot) if !slot.members.is_empty() => {
                let err = BarrierError::NotEmpty {
                    name: slot.name().to_owned(),
                    members: slot.members.len(),
                };
                self.slots[index] = Some(slot);
                Err(err)
            }
            Some(slot) => Ok(slot.barrier),
        }
    }

    /// Index of the barrier called `name`, in any state.
    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.name() == name))
    }

    /// Index of the active barrier called `name`.
    pub(crate) fn find_active(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|s| s.state == BarrierState::Active && s.name() == name)
        })
    }

    pub(crate) fn get(&self, index: usize) -> Option<&BarrierSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut BarrierSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// The slot still holding `barrier`, if it was not deleted meanwhile.
    pub(crate) fn slot_of(&self, barrier: &Arc<Barrier>) -> Option<&BarrierSlot> {
        self.get(barrier.index())
            .filter(|s| Arc::ptr_eq(&s.barrier, barrier))
    }

    pub(crate) fn slot_of_mut(&mut self, barrier: &Arc<Barrier>) -> Option<&mut BarrierSlot> {
        self.get_mut(barrier.index())
            .filter(|s| Arc::ptr_eq(&s.barrier, barrier))
    }

    pub(crate) fn occupied(&self) -> impl Iterator<Item = &BarrierSlot> {
        self.slots.iter().flatten()
    }

    pub(crate) fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}
