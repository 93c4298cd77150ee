//! Barriers, their banks and the registry table.
//!
//! # Architecture
//!
//! ## Barrier
//! The shared part of a barrier ([`Barrier`], handed out as `Arc`): its name,
//! the wait-if-alone policy, the rendezvous counter and two [`bank::Bank`]s.
//! Each bank owns a mutex, a condition variable, the required masks of the
//! members attached for the phases that use the bank, and the flags of the
//! members that have arrived since the bank was last released.
//!
//! ## Registry
//! [`registry::BarrierTable`] holds one [`registry::BarrierSlot`] per barrier:
//! the member list and the pending add/remove masks. Membership changes only
//! touch the slot; they reach a bank's masks at a fold point, with the
//! registry lock held first and the bank lock second.
//!
//! ## Locking
//! - registry lock, then bank lock: allowed (folds, arrivals)
//! - bank lock, then the other bank's lock: only with the registry lock held
//!   (snapshots)
//! - bank lock, then registry lock: never
//! - diagnostic log lock: never taken while a bank lock or the registry lock is held
//!
//! The engine itself ([`crate::BarrierSubsystem`]'s rendezvous and membership
//! methods) lives in [`rendezvous`] and [`membership`].

pub mod bank;
pub mod membership;
pub mod registry;
pub mod rendezvous;
pub mod snapshot;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use strum::Display;

use crate::def::BANK_COUNT;
use crate::member::{Member, MemberKind, SyncPhase, WaitMode};
use crate::utils::mask::MemberMask;
use bank::Bank;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum BarrierState {
    Empty,
    Active,
    MarkedForRemoval,
}

/// A pair of masks, one per member kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KindMasks {
    pub scheduler: MemberMask,
    pub process: MemberMask,
}

impl KindMasks {
    pub fn of(member: Member) -> Self {
        let mut m = KindMasks::default();
        *m.get_mut(member.kind()) = member.bit();
        m
    }

    pub fn get(&self, kind: MemberKind) -> MemberMask {
        match kind {
            MemberKind::Scheduler => self.scheduler,
            MemberKind::Process => self.process,
        }
    }

    pub fn get_mut(&mut self, kind: MemberKind) -> &mut MemberMask {
        match kind {
            MemberKind::Scheduler => &mut self.scheduler,
            MemberKind::Process => &mut self.process,
        }
    }

    pub fn contains(&self, member: Member) -> bool {
        self.get(member.kind()).test(member.slot())
    }

    pub fn insert(&mut self, member: Member) {
        self.get_mut(member.kind()).set(member.slot());
    }

    pub fn remove(&mut self, member: Member) {
        self.get_mut(member.kind()).clear(member.slot());
    }

    pub fn is_empty(&self) -> bool {
        self.scheduler.is_empty() && self.process.is_empty()
    }

    pub fn count(&self) -> u32 {
        self.scheduler.count() + self.process.count()
    }

    pub fn union(&self, other: &KindMasks) -> KindMasks {
        KindMasks {
            scheduler: self.scheduler.union(other.scheduler),
            process: self.process.union(other.process),
        }
    }

    pub fn intersection(&self, other: &KindMasks) -> KindMasks {
        KindMasks {
            scheduler: self.scheduler.intersection(other.scheduler),
            process: self.process.intersection(other.process),
        }
    }

    pub fn difference(&self, other: &KindMasks) -> KindMasks {
        KindMasks {
            scheduler: self.scheduler.difference(other.scheduler),
            process: self.process.difference(other.process),
        }
    }

    pub fn is_subset_of(&self, other: &KindMasks) -> bool {
        self.scheduler.is_subset_of(other.scheduler) && self.process.is_subset_of(other.process)
    }
}

/// One row of a barrier's member list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemberEntry {
    pub member: Member,
    pub phase: SyncPhase,
    pub mode: WaitMode,
}

impl MemberEntry {
    pub fn kind(&self) -> MemberKind {
        self.member.kind()
    }
}

/// What happened to a member at one arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum Arrival {
    /// This arrival satisfied the bank and released it.
    Released,
    /// Contributed without sleeping; the bank is not yet satisfied.
    WalkedThrough,
    /// Slept until another arrival released the bank.
    WokenUp,
    /// Slept until emergency cleanup removed the member.
    Evicted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
pub enum WaitStatus {
    Waiting,
    NotWaiting,
}

/// The shared, lock-protected part of a barrier.
pub struct Barrier {
    index: usize,
    name: String,
    wait_if_alone: bool,
    banks: [Bank; BANK_COUNT],
    /// Bank most recently entered, for inspection only.
    switch: AtomicUsize,
    wait_on_counter: AtomicU64,
}

impl Barrier {
    pub(crate) fn new(index: usize, name: &str, wait_if_alone: bool) -> Self {
        Self {
            index,
            name: name.to_owned(),
            wait_if_alone,
            banks: [Bank::new(), Bank::new()],
            switch: AtomicUsize::new(0),
            wait_on_counter: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_if_alone(&self) -> bool {
        self.wait_if_alone
    }

    pub fn wait_on_counter(&self) -> u64 {
        self.wait_on_counter.load(Ordering::SeqCst)
    }

    pub fn switch(&self) -> usize {
        self.switch.load(Ordering::Relaxed)
    }

    pub(crate) fn bank(&self, idx: usize) -> &Bank {
        &self.banks[idx]
    }

    pub(crate) fn set_switch(&self, idx: usize) {
        self.switch.store(idx, Ordering::Relaxed);
    }

    pub(crate) fn count_rendezvous(&self) -> u64 {
        self.wait_on_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}
