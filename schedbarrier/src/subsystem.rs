//! The process-wide barrier subsystem.
//!
//! A [`BarrierSubsystem`] owns the registry table, the diagnostic log and the
//! member directory. It is built once at startup and shared by reference (or
//! `Arc`) with every scheduler thread and every diagnostic consumer.
//!
//! This file holds construction, the registry operations and inspection. The
//! rendezvous engine is in [`crate::barrier::rendezvous`], membership changes
//! in [`crate::barrier::membership`].

use log::{error, info, warn};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::associations::{self, barrier_definitions};
use crate::barrier::bank::BankState;
use crate::barrier::registry::{BarrierSlot, BarrierTable};
use crate::barrier::snapshot::{BankSnapshot, BarrierSnapshot};
use crate::barrier::{Barrier, BarrierState, WaitStatus};
use crate::config::Config;
use crate::diag::{BarrierAction, BarrierLog};
use crate::directory::MemberDirectory;
use crate::error::{BarrierError, Result};
use crate::ini::IniStore;
use crate::member::Member;

/// A log record assembled while a lock is held and written after it is
/// released.
pub(crate) struct Trace {
    index: usize,
    name: String,
    action: BarrierAction,
    member: Option<Member>,
    line: u32,
    snapshot: Option<BarrierSnapshot>,
}

/// Traces collected under the locks of one operation.
pub(crate) type Traces = SmallVec<[Option<Trace>; 4]>;

pub struct BarrierSubsystem {
    config: Config,
    pub(crate) table: Mutex<BarrierTable>,
    log: BarrierLog,
    directory: MemberDirectory,
}

impl BarrierSubsystem {
    pub fn new(config: Config) -> Self {
        let table = BarrierTable::new(config.max_barriers, config.max_members_per_barrier);
        let log = BarrierLog::new(config.log_capacity, config.logging_enabled);
        Self {
            config,
            table: Mutex::new(table),
            log,
            directory: MemberDirectory::new(),
        }
    }

    /// Builds the subsystem from the store's tuning keys and loads every
    /// barrier definition it holds.
    pub fn from_store(store: &IniStore) -> Result<Self> {
        let subsystem = Self::new(Config::from_store(store)?);
        subsystem.load_barriers(store);
        Ok(subsystem)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &BarrierLog {
        &self.log
    }

    pub fn directory(&self) -> &MemberDirectory {
        &self.directory
    }

    /// Creates a barrier for every `Barrier_N` entry. Entries that cannot be
    /// parsed or created are reported and skipped. Returns how many barriers
    /// were created.
    pub fn load_barriers(&self, store: &IniStore) -> usize {
        let mut created = 0;
        for (i, def) in barrier_definitions(store) {
            let def = match def {
                Ok(def) => def,
                Err(e) => {
                    error!("skipping barrier definition #{}: {}", i, e);
                    continue;
                }
            };
            match self.add_barrier(&def.name, def.wait_if_alone) {
                Ok(_) => created += 1,
                Err(e) => error!("cannot load barrier '{}': {}", def.name, e),
            }
        }
        info!("loaded {} barriers", created);
        created
    }

    pub fn add_barrier(&self, name: &str, wait_if_alone: bool) -> Result<usize> {
        let mut table = self.table.lock();
        let index = table.add(name, wait_if_alone)?;
        let trace = self.trace_slot(table.get(index), BarrierAction::AddBarrier, None, line!());
        drop(table);
        info!(
            "barrier '{}' created at slot {} (wait_if_alone={})",
            name, index, wait_if_alone
        );
        self.emit(trace);
        Ok(index)
    }

    /// Deletes a barrier that has no members.
    pub fn delete_barrier(&self, name: &str) -> Result<()> {
        let index = self.table.lock().delete(name)?;
        info!("barrier '{}' deleted from slot {}", name, index);
        self.emit(Some(Trace::bare(index, name, BarrierAction::DeleteBarrier, line!())));
        Ok(())
    }

    /// Deletes the barrier now if it has no members, otherwise hides it from
    /// new connections and deletes it when its last member leaves. Returns
    /// true if the barrier was deleted immediately.
    pub fn request_barrier_removal(&self, name: &str) -> Result<bool> {
        let mut table = self.table.lock();
        let index = table
            .find(name)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        if table.delete_at(index).is_ok() {
            drop(table);
            info!("barrier '{}' deleted from slot {}", name, index);
            self.emit(Some(Trace::bare(index, name, BarrierAction::DeleteBarrier, line!())));
            return Ok(true);
        }
        let Some(slot) = table.get_mut(index) else {
            return Err(BarrierError::UnknownBarrier(name.to_owned()));
        };
        slot.state = BarrierState::MarkedForRemoval;
        let members = slot.members.len();
        let trace = self.trace_slot(table.get(index), BarrierAction::MarkForRemoval, None, line!());
        drop(table);
        warn!(
            "barrier '{}' marked for removal, {} members still attached",
            name, members
        );
        self.emit(trace);
        Ok(false)
    }

    /// Adds a barrier definition to the store and creates the barrier.
    pub fn define_barrier(&self, store: &mut IniStore, name: &str, wait_if_alone: bool) -> Result<usize> {
        let index = self.add_barrier(name, wait_if_alone)?;
        if let Err(e) = associations::add_barrier_definition(store, name, wait_if_alone) {
            // keep registry and store in agreement
            self.delete_barrier(name)?;
            return Err(e);
        }
        Ok(index)
    }

    /// Deletes a memberless barrier and drops its definition from the store.
    pub fn undefine_barrier(&self, store: &mut IniStore, name: &str) -> Result<()> {
        self.delete_barrier(name)?;
        associations::remove_barrier_definition(store, name)
    }

    pub fn barrier_count(&self) -> usize {
        self.table.lock().occupied().count()
    }

    pub fn barrier_names(&self) -> Vec<String> {
        self.table
            .lock()
            .occupied()
            .map(|s| s.name().to_owned())
            .collect()
    }

    /// Slot index of an active barrier.
    pub fn barrier_index(&self, name: &str) -> Result<usize> {
        self.table
            .lock()
            .find_active(name)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))
    }

    pub(crate) fn barrier_at(&self, index: usize) -> Result<Arc<Barrier>> {
        self.table
            .lock()
            .get(index)
            .map(|s| s.barrier.clone())
            .ok_or_else(|| BarrierError::UnknownBarrier(format!("#{}", index)))
    }

    pub fn barrier_snapshot(&self, name: &str) -> Result<BarrierSnapshot> {
        let table = self.table.lock();
        let index = table
            .find(name)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        table
            .get(index)
            .map(BarrierSnapshot::capture)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))
    }

    pub fn barrier_snapshot_at(&self, index: usize) -> Option<BarrierSnapshot> {
        self.table.lock().get(index).map(BarrierSnapshot::capture)
    }

    pub fn snapshots(&self) -> Vec<BarrierSnapshot> {
        self.table
            .lock()
            .occupied()
            .map(BarrierSnapshot::capture)
            .collect()
    }

    /// Whether `member` is currently sleeping in either bank of the barrier.
    pub fn member_wait_status(&self, member: Member, name: &str) -> Result<WaitStatus> {
        let table = self.table.lock();
        let slot = table
            .find(name)
            .and_then(|i| table.get(i))
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        if !slot.has_member(member) {
            return Err(BarrierError::NotAssociated {
                member: member.to_string(),
                name: name.to_owned(),
            });
        }
        let sleeping = (0..crate::def::BANK_COUNT)
            .any(|b| slot.barrier.bank(b).state.lock().waiting.contains(member));
        Ok(if sleeping {
            WaitStatus::Waiting
        } else {
            WaitStatus::NotWaiting
        })
    }

    /// Builds a trace of `slot`. Called with the registry lock held and no
    /// bank lock held.
    pub(crate) fn trace_slot(
        &self,
        slot: Option<&BarrierSlot>,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
    ) -> Option<Trace> {
        let slot = slot?;
        self.trace_with(slot, action, member, line, || BarrierSnapshot::capture(slot))
    }

    /// Builds a trace of `slot` for a caller that holds the registry lock and
    /// the lock of bank `bank_idx`, whose state is `held`.
    pub(crate) fn trace_holding(
        &self,
        slot: &BarrierSlot,
        bank_idx: usize,
        held: &BankState,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
    ) -> Option<Trace> {
        self.trace_with(slot, action, member, line, || {
            BarrierSnapshot::capture_holding(slot, bank_idx, held)
        })
    }

    fn trace_with(
        &self,
        slot: &BarrierSlot,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
        snapshot: impl FnOnce() -> BarrierSnapshot,
    ) -> Option<Trace> {
        if !self.log.is_enabled() {
            return None;
        }
        Some(Trace {
            index: slot.barrier.index(),
            name: slot.name().to_owned(),
            action,
            member,
            line,
            snapshot: Some(snapshot()),
        })
    }

    /// Records an action on `barrier`. Takes the registry lock for the
    /// snapshot, so it must not be called with any barrier lock held.
    pub(crate) fn record(
        &self,
        barrier: &Arc<Barrier>,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
    ) {
        self.record_with(barrier, action, member, line, None);
    }

    /// Like [`Self::record`], with bank `bank_idx` shown as `bank`, a copy
    /// taken under the bank lock when the action happened.
    pub(crate) fn record_bank(
        &self,
        barrier: &Arc<Barrier>,
        bank_idx: usize,
        bank: BankSnapshot,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
    ) {
        self.record_with(barrier, action, member, line, Some((bank_idx, bank)));
    }

    fn record_with(
        &self,
        barrier: &Arc<Barrier>,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
        bank: Option<(usize, BankSnapshot)>,
    ) {
        if !self.log.is_enabled() {
            return;
        }
        let trace = {
            let table = self.table.lock();
            self.trace_slot(table.slot_of(barrier), action, member, line)
        };
        let mut trace = trace.unwrap_or_else(|| Trace {
            member,
            ..Trace::bare(barrier.index(), barrier.name(), action, line)
        });
        if let Some((idx, bank)) = bank {
            trace.snapshot = trace.snapshot.map(|s| s.with_bank(idx, bank));
        }
        self.emit(Some(trace));
    }

    pub(crate) fn emit_all(&self, traces: Traces) {
        for trace in traces {
            self.emit(trace);
        }
    }

    pub(crate) fn emit(&self, trace: Option<Trace>) {
        if let Some(t) = trace {
            self.log
                .push(t.index, &t.name, t.action, t.member, t.line, t.snapshot);
        }
    }
}

impl Trace {
    /// A trace without a snapshot, for barriers that no longer exist.
    pub(crate) fn bare(index: usize, name: &str, action: BarrierAction, line: u32) -> Self {
        Self {
            index,
            name: name.to_owned(),
            action,
            member: None,
            line,
            snapshot: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::ProcessId;

    fn subsystem(max_barriers: usize) -> BarrierSubsystem {
        let mut config = Config::default();
        config.max_barriers = max_barriers;
        config.set_logging_enabled(true);
        BarrierSubsystem::new(config)
    }

    #[test]
    fn test_registry_errors() {
        let sub = subsystem(2);
        assert_eq!(0, sub.add_barrier("A", false).unwrap());
        assert!(matches!(
            sub.add_barrier("A", true),
            Err(BarrierError::DuplicateName(_))
        ));
        sub.add_barrier("B", false).unwrap();
        assert!(matches!(
            sub.add_barrier("C", false),
            Err(BarrierError::RegistryFull(2))
        ));
        assert!(matches!(
            sub.delete_barrier("C"),
            Err(BarrierError::UnknownBarrier(_))
        ));
        sub.delete_barrier("A").unwrap();
        assert_eq!(vec!["B".to_owned()], sub.barrier_names());
        assert_eq!(1, sub.barrier_count());
    }

    #[test]
    fn test_load_skips_broken_entries() {
        let store = IniStore::parse(
            "[SchedulerBarriers]\n\
             Barrier_0=Sync\n\
             Barrier_1=,WaitIfAlone\n\
             Barrier_2=Gate,WaitIfAlone\n\
             Barrier_3=Sync\n",
        )
        .unwrap();
        let sub = BarrierSubsystem::from_store(&store).unwrap();
        assert_eq!(2, sub.barrier_count());
        assert!(sub.barrier_snapshot("Gate").unwrap().wait_if_alone);
        assert!(!sub.barrier_snapshot("Sync").unwrap().wait_if_alone);
    }

    #[test]
    fn test_removal_request_on_empty_barrier() {
        let sub = subsystem(2);
        sub.add_barrier("A", false).unwrap();
        assert!(sub.request_barrier_removal("A").unwrap());
        assert_eq!(0, sub.barrier_count());
        let actions: Vec<BarrierAction> = sub.log().entries().iter().map(|e| e.action).collect();
        assert_eq!(
            vec![BarrierAction::AddBarrier, BarrierAction::DeleteBarrier],
            actions
        );
    }

    #[test]
    fn test_wait_status_requires_membership() {
        let sub = subsystem(2);
        sub.add_barrier("A", false).unwrap();
        let p = Member::from(ProcessId::new(0).unwrap());
        assert!(matches!(
            sub.member_wait_status(p, "A"),
            Err(BarrierError::NotAssociated { .. })
        ));
        assert!(matches!(
            sub.member_wait_status(p, "Z"),
            Err(BarrierError::UnknownBarrier(_))
        ));
    }

    #[test]
    fn test_define_and_undefine_persist() {
        let sub = subsystem(4);
        let mut store = IniStore::new();
        sub.define_barrier(&mut store, "A", true).unwrap();
        assert_eq!(Some("A,WaitIfAlone"), store.get("SchedulerBarriers", "Barrier_0"));
        sub.undefine_barrier(&mut store, "A").unwrap();
        assert_eq!(None, store.get("SchedulerBarriers", "Barrier_0"));
        assert_eq!(0, sub.barrier_count());
    }
}
