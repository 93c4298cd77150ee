//! Connecting and disconnecting members.
//!
//! A connect only touches the registry: the member entry is appended and the
//! member's bit is queued in the pending add mask of the bank its phase uses.
//! A normal disconnect queues the bit for removal and folds it into the banks
//! right away, under the registry lock. An emergency disconnect takes the bit
//! out of the pending masks, drops the registry lock, and only then locks the
//! banks to remove the bit, evict the member if it is sleeping and release
//! whoever was waiting only for it.

use log::{debug, warn};
use smallvec::SmallVec;
use std::sync::Arc;

use super::bank::Settle;
use super::registry::BarrierTable;
use super::snapshot::BankSnapshot;
use super::{Arrival, Barrier, BarrierState, KindMasks};
use crate::associations;
use crate::def::BANK_COUNT;
use crate::diag::BarrierAction;
use crate::error::{BarrierError, Result};
use crate::ini::IniStore;
use crate::member::{Member, MemberKind, ProcessId, SchedulerId, SyncPhase, WaitMode};
use crate::subsystem::{BarrierSubsystem, Trace, Traces};

impl BarrierSubsystem {
    pub fn connect_process(
        &self,
        process: ProcessId,
        name: &str,
        phase: SyncPhase,
        mode: WaitMode,
    ) -> Result<usize> {
        self.connect(process.into(), name, phase, mode)
    }

    pub fn connect_scheduler(
        &self,
        scheduler: SchedulerId,
        name: &str,
        phase: SyncPhase,
        mode: WaitMode,
    ) -> Result<usize> {
        self.connect(scheduler.into(), name, phase, mode)
    }

    /// Attaches `member` to the active barrier `name` for `phase`. Returns the
    /// barrier's slot index. On failure the barrier is left unchanged.
    pub fn connect(
        &self,
        member: Member,
        name: &str,
        phase: SyncPhase,
        mode: WaitMode,
    ) -> Result<usize> {
        if !phase.allowed_for(member.kind()) {
            return Err(BarrierError::InvalidPhase { member, phase });
        }
        let mut table = self.table.lock();
        let index = table
            .find_active(name)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        let capacity = table.max_members();
        let slot = table
            .get_mut(index)
            .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
        slot.attach(member, phase, mode, capacity)?;
        let trace = self.trace_slot(
            table.get(index),
            BarrierAction::connect(member.kind()),
            Some(member),
            line!(),
        );
        drop(table);
        debug!("{} connected to '{}' at {} ({})", member, name, phase, mode);
        self.emit(trace);
        Ok(index)
    }

    pub fn disconnect_process(
        &self,
        process: ProcessId,
        name: Option<&str>,
        emergency: bool,
    ) -> Result<usize> {
        self.disconnect(process.into(), name, emergency)
    }

    pub fn disconnect_scheduler(
        &self,
        scheduler: SchedulerId,
        name: Option<&str>,
        emergency: bool,
    ) -> Result<usize> {
        self.disconnect(scheduler.into(), name, emergency)
    }

    /// Removes `member` from the barrier `name`, or from every barrier when
    /// `name` is `None`. Returns the number of member entries removed.
    ///
    /// With `emergency` set the member is treated as crashed: if it is
    /// sleeping it is evicted, and peers that were waiting only for it are
    /// released within this call.
    pub fn disconnect(&self, member: Member, name: Option<&str>, emergency: bool) -> Result<usize> {
        let action = BarrierAction::disconnect(member.kind(), emergency);
        let mut removed = 0;
        let mut traces = Traces::new();
        let mut victims: SmallVec<[(Arc<Barrier>, [bool; BANK_COUNT]); 4]> = SmallVec::new();
        {
            let mut table = self.table.lock();
            if let Some(n) = name {
                if table.find(n).is_none() {
                    return Err(BarrierError::UnknownBarrier(n.to_owned()));
                }
            }
            for index in table.occupied_indices() {
                let Some(slot) = table.get_mut(index) else {
                    continue;
                };
                if name.is_some_and(|n| n != slot.name()) || !slot.has_member(member) {
                    continue;
                }
                removed += slot.detach(member);
                let barrier = slot.barrier.clone();
                if emergency {
                    let banks = slot.take_pending_remove(member);
                    traces.push(self.trace_slot(Some(&*slot), action, Some(member), line!()));
                    victims.push((barrier, banks));
                } else {
                    traces.push(self.trace_slot(Some(&*slot), action, Some(member), line!()));
                    for bank_idx in 0..BANK_COUNT {
                        let bank = barrier.bank(bank_idx);
                        let mut state = bank.state.lock();
                        let departed = slot.fold_removes(bank_idx, &mut state);
                        let evicted = state.evict(member);
                        if !departed.is_empty() {
                            traces.push(self.trace_holding(
                                slot,
                                bank_idx,
                                &state,
                                BarrierAction::FoldRemove,
                                Some(member),
                                line!(),
                            ));
                        }
                        if state.settle(barrier.wait_if_alone(), &departed) == Settle::Released {
                            self.complete(&barrier, bank_idx);
                            traces.push(self.trace_holding(
                                slot,
                                bank_idx,
                                &state,
                                BarrierAction::Release,
                                None,
                                line!(),
                            ));
                        } else if evicted {
                            bank.cond.notify_all();
                        }
                    }
                }
                self.delete_if_marked(&mut table, index, &mut traces);
            }
        }
        self.emit_all(traces);
        for (barrier, banks) in &victims {
            self.evict(barrier, member, banks);
        }
        match name {
            Some(n) if removed == 0 => Err(BarrierError::NotAssociated {
                member: member.to_string(),
                name: n.to_owned(),
            }),
            _ => {
                debug!("{} disconnected from {} entries", member, removed);
                Ok(removed)
            }
        }
    }

    fn delete_if_marked(&self, table: &mut BarrierTable, index: usize, traces: &mut Traces) {
        let marked = table
            .get(index)
            .is_some_and(|s| s.state == BarrierState::MarkedForRemoval);
        if !marked {
            return;
        }
        if let Ok(barrier) = table.delete_at(index) {
            debug!("barrier '{}' removed after its last member left", barrier.name());
            traces.push(Some(Trace::bare(
                index,
                barrier.name(),
                BarrierAction::DeleteBarrier,
                line!(),
            )));
        }
    }

    /// Second half of an emergency disconnect, run without the registry
    /// lock: removes the member's bit from the banks it was folded into and
    /// wakes it if it sleeps in either bank. The crashed member's signal
    /// counts for the round in flight, so peers that waited only for it are
    /// released here.
    fn evict(&self, barrier: &Arc<Barrier>, member: Member, folded: &[bool; BANK_COUNT]) {
        let bit = KindMasks::of(member);
        for (bank_idx, &was_folded) in folded.iter().enumerate() {
            let bank = barrier.bank(bank_idx);
            let mut state = bank.state.lock();
            let departed = if was_folded {
                state.remove_masks(&bit)
            } else {
                KindMasks::default()
            };
            let evicted = state.evict(member);
            let released = state.settle(barrier.wait_if_alone(), &departed) == Settle::Released;
            if released {
                self.complete(barrier, bank_idx);
            } else if evicted {
                bank.cond.notify_all();
            }
            let after = BankSnapshot::from(&*state);
            drop(state);
            if evicted || released {
                warn!(
                    "emergency cleanup of {} at '{}' bank {}: evicted={} released={}",
                    member,
                    barrier.name(),
                    bank_idx,
                    evicted,
                    released
                );
            }
            if released {
                self.record_bank(barrier, bank_idx, after, BarrierAction::Release, None, line!());
            }
        }
    }

    /// Connects a named member to every barrier its association keys list.
    /// Registers the member in the directory if needed. If any connect
    /// fails, the ones already made are undone.
    pub fn attach_from_store(
        &self,
        store: &IniStore,
        member_name: &str,
        kind: MemberKind,
    ) -> Result<MemberBarriers> {
        let member: Member = match kind {
            MemberKind::Process => {
                self.directory().register_process(member_name)?.into()
            }
            MemberKind::Scheduler => {
                self.directory().register_scheduler(member_name)?.into()
            }
        };
        let mut attached = MemberBarriers {
            member,
            attachments: Vec::new(),
        };
        for assoc in associations::associations(store, kind, member_name) {
            match self.connect(member, &assoc.barrier, assoc.phase, assoc.mode) {
                Ok(index) => attached.attachments.push(Attachment {
                    index,
                    barrier: assoc.barrier,
                    phase: assoc.phase,
                }),
                Err(e) => {
                    warn!("cannot attach {} '{}': {}", kind, member_name, e);
                    for a in &attached.attachments {
                        // an earlier attachment to the same barrier may already have removed it
                        let _ = self.disconnect(member, Some(&a.barrier), false);
                    }
                    return Err(e);
                }
            }
        }
        Ok(attached)
    }
}

#[derive(Clone, Debug)]
struct Attachment {
    index: usize,
    barrier: String,
    phase: SyncPhase,
}

/// The barriers one member is attached to, in configuration order.
#[derive(Clone, Debug)]
pub struct MemberBarriers {
    member: Member,
    attachments: Vec<Attachment>,
}

impl MemberBarriers {
    pub fn member(&self) -> Member {
        self.member
    }

    /// Names of the barriers met at `phase`.
    pub fn barriers_for(&self, phase: SyncPhase) -> Vec<&str> {
        self.attachments
            .iter()
            .filter(|a| a.phase == phase)
            .map(|a| a.barrier.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    /// Arrives at every barrier attached for `phase`, one after the other.
    pub fn arrive_all(&self, subsystem: &BarrierSubsystem, phase: SyncPhase) -> Result<Vec<Arrival>> {
        self.attachments
            .iter()
            .filter(|a| a.phase == phase)
            .map(|a| subsystem.arrive(a.index, self.member, phase))
            .collect()
    }

    /// Like [`Self::arrive_all`], running `on_sleep` while asleep at any of
    /// the barriers.
    pub fn arrive_all_with(
        &self,
        subsystem: &BarrierSubsystem,
        phase: SyncPhase,
        on_sleep: &mut dyn FnMut(),
    ) -> Result<Vec<Arrival>> {
        let mut arrivals = Vec::new();
        for a in self.attachments.iter().filter(|a| a.phase == phase) {
            arrivals.push(subsystem.arrive_with(a.index, self.member, phase, Some(&mut *on_sleep))?);
        }
        Ok(arrivals)
    }

    /// Disconnects the member from every barrier it is attached to.
    pub fn detach_all(self, subsystem: &BarrierSubsystem, emergency: bool) -> Result<usize> {
        subsystem.disconnect(self.member, None, emergency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn subsystem() -> BarrierSubsystem {
        let mut config = Config::default();
        config.max_members_per_barrier = 2;
        config.set_logging_enabled(true);
        BarrierSubsystem::new(config)
    }

    fn p(slot: usize) -> ProcessId {
        ProcessId::new(slot).unwrap()
    }

    #[test]
    fn test_connect_errors_leave_barrier_unchanged() {
        let sub = subsystem();
        sub.add_barrier("B", false).unwrap();
        assert!(matches!(
            sub.connect_process(p(0), "X", SyncPhase::Before, WaitMode::SignalOnly),
            Err(BarrierError::UnknownBarrier(_))
        ));
        sub.connect_process(p(0), "B", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
        sub.connect_process(p(1), "B", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
        let before = sub.barrier_snapshot("B").unwrap();
        assert!(matches!(
            sub.connect_process(p(2), "B", SyncPhase::Before, WaitMode::SignalOnly),
            Err(BarrierError::MemberTableFull { capacity: 2, .. })
        ));
        assert!(matches!(
            sub.connect_scheduler(
                SchedulerId::new(0).unwrap(),
                "B",
                SyncPhase::LoopOutBehind,
                WaitMode::SignalOnly
            ),
            Err(BarrierError::InvalidPhase { .. })
        ));
        assert_eq!(before, sub.barrier_snapshot("B").unwrap());
    }

    #[test]
    fn test_disconnect_errors() {
        let sub = subsystem();
        sub.add_barrier("B", false).unwrap();
        assert!(matches!(
            sub.disconnect_process(p(0), Some("B"), false),
            Err(BarrierError::NotAssociated { .. })
        ));
        assert!(matches!(
            sub.disconnect_process(p(0), Some("Z"), false),
            Err(BarrierError::UnknownBarrier(_))
        ));
        assert_eq!(0, sub.disconnect_process(p(0), None, false).unwrap());
    }

    #[test]
    fn test_disconnect_everywhere() {
        let sub = subsystem();
        for name in ["A", "B"] {
            sub.add_barrier(name, false).unwrap();
            sub.connect_process(p(0), name, SyncPhase::Before, WaitMode::SignalOnly)
                .unwrap();
        }
        sub.connect_process(p(0), "A", SyncPhase::Behind, WaitMode::SignalOnly)
            .unwrap();
        assert_eq!(3, sub.disconnect_process(p(0), None, false).unwrap());
        assert!(sub.snapshots().iter().all(|s| s.member_count == 0));
    }

    #[test]
    fn test_disconnect_completes_pending_round() {
        let sub = subsystem();
        let idx = sub.add_barrier("B", false).unwrap();
        sub.connect_process(p(0), "B", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
        sub.connect_process(p(1), "B", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
        assert_eq!(Arrival::WalkedThrough, sub.before_process(idx, p(0)).unwrap());
        sub.disconnect_process(p(1), Some("B"), false).unwrap();
        assert_eq!(1, sub.barrier_snapshot("B").unwrap().wait_on_counter);

        let actions: Vec<BarrierAction> = sub
            .log()
            .recent(3)
            .into_iter()
            .rev()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            vec![
                BarrierAction::DisconnectProcess,
                BarrierAction::FoldRemove,
                BarrierAction::Release,
            ],
            actions
        );
        let release = sub.log().recent(1).remove(0);
        let snap = release.snapshot.unwrap();
        assert_eq!(1, snap.wait_on_counter);
        assert!(snap.banks[0].flags.is_empty());
    }

    #[test]
    fn test_marked_barrier_removed_with_last_member() {
        let sub = subsystem();
        sub.add_barrier("B", false).unwrap();
        sub.connect_process(p(0), "B", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
        assert!(!sub.request_barrier_removal("B").unwrap());
        assert!(matches!(
            sub.connect_process(p(1), "B", SyncPhase::Before, WaitMode::SignalOnly),
            Err(BarrierError::UnknownBarrier(_))
        ));
        assert_eq!(
            BarrierState::MarkedForRemoval,
            sub.barrier_snapshot("B").unwrap().state
        );
        sub.disconnect_process(p(0), Some("B"), false).unwrap();
        assert_eq!(0, sub.barrier_count());
        let last = sub.log().recent(1).remove(0);
        assert_eq!(BarrierAction::DeleteBarrier, last.action);
    }

    #[test]
    fn test_attach_from_store() {
        let store = IniStore::parse(
            "[SchedulerBarriers]\n\
             Barrier_0=Sync\n\
             Barrier_1=Gate\n\
             BarriersBeforeSignalAndWaitForProcess Model=Sync;Gate\n\
             BarriersBehindOnlySignalForProcess Model=Sync\n",
        )
        .unwrap();
        let sub = BarrierSubsystem::from_store(&store).unwrap();
        let attached = sub
            .attach_from_store(&store, "Model", MemberKind::Process)
            .unwrap();
        assert_eq!(vec!["Sync", "Gate"], attached.barriers_for(SyncPhase::Before));
        assert_eq!(vec!["Sync"], attached.barriers_for(SyncPhase::Behind));
        assert_eq!(
            vec![Arrival::Released, Arrival::Released],
            attached.arrive_all(&sub, SyncPhase::Before).unwrap()
        );
        assert_eq!(3, attached.detach_all(&sub, false).unwrap());
    }

    #[test]
    fn test_attach_from_store_rolls_back() {
        let store = IniStore::parse(
            "[SchedulerBarriers]\n\
             Barrier_0=Sync\n\
             BarriersBeforeSignalAndWaitForProcess Model=Sync;Missing\n",
        )
        .unwrap();
        let sub = BarrierSubsystem::from_store(&store).unwrap();
        assert!(matches!(
            sub.attach_from_store(&store, "Model", MemberKind::Process),
            Err(BarrierError::UnknownBarrier(_))
        ));
        assert_eq!(0, sub.barrier_snapshot("Sync").unwrap().member_count);
    }
}
