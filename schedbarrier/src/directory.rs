use dashmap::DashMap;
use log::debug;

use crate::def::MAX_MEMBER_SLOTS;
use crate::error::{BarrierError, Result};
use crate::member::{Member, MemberKind, ProcessId, SchedulerId};
use crate::utils::bitmap::SlotBitmap;

/// Hands out member slot ids to named processes and schedulers.
///
/// Processes and schedulers draw from separate slot spaces. Registering a
/// name twice returns the id it already holds.
pub struct MemberDirectory {
    process_slots: SlotBitmap,
    scheduler_slots: SlotBitmap,
    by_name: DashMap<(MemberKind, String), Member>,
    names: DashMap<Member, String>,
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self {
            process_slots: SlotBitmap::new(MAX_MEMBER_SLOTS),
            scheduler_slots: SlotBitmap::new(MAX_MEMBER_SLOTS),
            by_name: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn register_process(&self, name: &str) -> Result<ProcessId> {
        match self.register(MemberKind::Process, name)? {
            Member::Process(id) => Ok(id),
            other => Err(BarrierError::UnknownMember(other.to_string())),
        }
    }

    pub fn register_scheduler(&self, name: &str) -> Result<SchedulerId> {
        match self.register(MemberKind::Scheduler, name)? {
            Member::Scheduler(id) => Ok(id),
            other => Err(BarrierError::UnknownMember(other.to_string())),
        }
    }

    fn slots(&self, kind: MemberKind) -> &SlotBitmap {
        match kind {
            MemberKind::Process => &self.process_slots,
            MemberKind::Scheduler => &self.scheduler_slots,
        }
    }

    fn register(&self, kind: MemberKind, name: &str) -> Result<Member> {
        let entry = self.by_name.entry((kind, name.to_owned()));
        if let dashmap::mapref::entry::Entry::Occupied(e) = &entry {
            return Ok(*e.get());
        }
        let slot = self
            .slots(kind)
            .try_acquire()
            .ok_or(BarrierError::MemberSlotsExhausted(kind.into()))?;
        let member = match kind {
            MemberKind::Process => ProcessId::new(slot).map(Member::Process),
            MemberKind::Scheduler => SchedulerId::new(slot).map(Member::Scheduler),
        }
        .ok_or(BarrierError::MemberSlotsExhausted(kind.into()))?;
        entry.or_insert(member);
        self.names.insert(member, name.to_owned());
        debug!("registered {} '{}' as {}", kind, name, member);
        Ok(member)
    }

    /// Frees the slot held by `member`. Returns its name.
    pub fn unregister(&self, member: Member) -> Result<String> {
        let (_, name) = self
            .names
            .remove(&member)
            .ok_or_else(|| BarrierError::UnknownMember(member.to_string()))?;
        self.by_name.remove(&(member.kind(), name.clone()));
        self.slots(member.kind()).release(member.slot());
        debug!("unregistered {} '{}'", member, name);
        Ok(name)
    }

    pub fn lookup(&self, kind: MemberKind, name: &str) -> Result<Member> {
        self.by_name
            .get(&(kind, name.to_owned()))
            .map(|m| *m)
            .ok_or_else(|| BarrierError::UnknownMember(name.to_owned()))
    }

    pub fn name_of(&self, member: Member) -> Option<String> {
        self.names.get(&member).map(|n| n.clone())
    }

    pub fn count(&self, kind: MemberKind) -> usize {
        self.slots(kind).in_use()
    }
}
