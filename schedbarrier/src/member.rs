//! Member references and the vocabulary of a rendezvous.
//!
//! A [`Member`] identifies either a process or a scheduler by its slot id.
//! The slot id selects the member's bit in the barrier masks; processes and
//! schedulers live in separate slot spaces, so the kind always travels with
//! the id.

use serde::Serialize;
use std::fmt;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::def::MAX_MEMBER_SLOTS;
use crate::utils::mask::MemberMask;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SchedulerId(u8);

impl ProcessId {
    /// Returns `None` if `slot` is outside the process slot space.
    pub fn new(slot: usize) -> Option<Self> {
        (slot < MAX_MEMBER_SLOTS).then_some(Self(slot as u8))
    }

    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

impl SchedulerId {
    /// Returns `None` if `slot` is outside the scheduler slot space.
    pub fn new(slot: usize) -> Option<Self> {
        (slot < MAX_MEMBER_SLOTS).then_some(Self(slot as u8))
    }

    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr)]
pub enum MemberKind {
    #[strum(to_string = "Process", serialize = "process")]
    Process,
    #[strum(to_string = "Scheduler", serialize = "scheduler")]
    Scheduler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Member {
    Process(ProcessId),
    Scheduler(SchedulerId),
}

impl Member {
    pub fn kind(self) -> MemberKind {
        match self {
            Member::Process(_) => MemberKind::Process,
            Member::Scheduler(_) => MemberKind::Scheduler,
        }
    }

    pub fn slot(self) -> usize {
        match self {
            Member::Process(p) => p.slot(),
            Member::Scheduler(s) => s.slot(),
        }
    }

    pub fn bit(self) -> MemberMask {
        MemberMask::single(self.slot())
    }
}

impl From<ProcessId> for Member {
    fn from(p: ProcessId) -> Self {
        Member::Process(p)
    }
}

impl From<SchedulerId> for Member {
    fn from(s: SchedulerId) -> Self {
        Member::Scheduler(s)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Process(p) => write!(f, "process#{}", p.slot()),
            Member::Scheduler(s) => write!(f, "scheduler#{}", s.slot()),
        }
    }
}

/// How a member takes part in a rendezvous. Rendered with the words used in
/// association keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr)]
pub enum WaitMode {
    /// Contribute the member's bit and continue immediately.
    #[strum(to_string = "OnlySignal", serialize = "SignalOnly", serialize = "signal")]
    SignalOnly,
    /// Contribute the member's bit and sleep until the bank is released.
    #[strum(to_string = "SignalAndWait", serialize = "wait")]
    SignalAndWait,
}

/// The synchronization point at which a member meets a barrier.
///
/// `Before` and `LoopOutBefore` use bank 0, `Behind` and `LoopOutBehind` use
/// bank 1. Loop-out phases are only available to processes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum SyncPhase {
    #[strum(to_string = "Before", serialize = "before")]
    Before,
    #[strum(to_string = "Behind", serialize = "behind")]
    Behind,
    #[strum(to_string = "LoopOutBefore", serialize = "loop-out-before")]
    LoopOutBefore,
    #[strum(to_string = "LoopOutBehind", serialize = "loop-out-behind")]
    LoopOutBehind,
}

impl SyncPhase {
    pub fn bank(self) -> usize {
        match self {
            SyncPhase::Before | SyncPhase::LoopOutBefore => 0,
            SyncPhase::Behind | SyncPhase::LoopOutBehind => 1,
        }
    }

    pub fn is_loop_out(self) -> bool {
        matches!(self, SyncPhase::LoopOutBefore | SyncPhase::LoopOutBehind)
    }

    pub fn allowed_for(self, kind: MemberKind) -> bool {
        kind == MemberKind::Process || !self.is_loop_out()
    }
}
