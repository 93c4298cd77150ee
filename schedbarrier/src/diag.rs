//! Diagnostic log: a fixed-capacity ring of barrier transitions.
//!
//! Every entry carries a snapshot of the barrier taken just before the entry
//! is written. Snapshots are captured by the caller without the log lock, so
//! the only lock taken here is the ring's own.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::barrier::snapshot::BarrierSnapshot;
use crate::member::{Member, MemberKind, SyncPhase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Display, EnumIter, IntoStaticStr)]
pub enum BarrierAction {
    AddBarrier,
    DeleteBarrier,
    MarkForRemoval,
    ConnectProcess,
    ConnectScheduler,
    DisconnectProcess,
    DisconnectScheduler,
    EmergencyRemoveProcess,
    EmergencyRemoveScheduler,
    FoldAddBefore,
    FoldAddBehind,
    FoldRemove,
    SleepBeforeProcess,
    SleepBehindProcess,
    SleepBeforeScheduler,
    SleepBehindScheduler,
    SleepLoopOutBefore,
    SleepLoopOutBehind,
    WakeUp,
    WalkThrough,
    Release,
    Evicted,
}

impl BarrierAction {
    pub fn sleep(kind: MemberKind, phase: SyncPhase) -> Self {
        match (kind, phase) {
            (_, SyncPhase::LoopOutBefore) => BarrierAction::SleepLoopOutBefore,
            (_, SyncPhase::LoopOutBehind) => BarrierAction::SleepLoopOutBehind,
            (MemberKind::Process, SyncPhase::Before) => BarrierAction::SleepBeforeProcess,
            (MemberKind::Process, SyncPhase::Behind) => BarrierAction::SleepBehindProcess,
            (MemberKind::Scheduler, SyncPhase::Before) => BarrierAction::SleepBeforeScheduler,
            (MemberKind::Scheduler, SyncPhase::Behind) => BarrierAction::SleepBehindScheduler,
        }
    }

    pub fn connect(kind: MemberKind) -> Self {
        match kind {
            MemberKind::Process => BarrierAction::ConnectProcess,
            MemberKind::Scheduler => BarrierAction::ConnectScheduler,
        }
    }

    pub fn disconnect(kind: MemberKind, emergency: bool) -> Self {
        match (kind, emergency) {
            (MemberKind::Process, false) => BarrierAction::DisconnectProcess,
            (MemberKind::Scheduler, false) => BarrierAction::DisconnectScheduler,
            (MemberKind::Process, true) => BarrierAction::EmergencyRemoveProcess,
            (MemberKind::Scheduler, true) => BarrierAction::EmergencyRemoveScheduler,
        }
    }

    pub fn fold_add(bank: usize) -> Self {
        if bank == 0 {
            BarrierAction::FoldAddBefore
        } else {
            BarrierAction::FoldAddBehind
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    /// Global, monotonically increasing sequence number.
    pub seq: u64,
    pub barrier_index: usize,
    pub barrier_name: String,
    pub action: BarrierAction,
    pub member: Option<Member>,
    /// Source line that recorded the entry.
    pub line: u32,
    pub snapshot: Option<BarrierSnapshot>,
}

struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
}

pub struct BarrierLog {
    enabled: AtomicBool,
    ring: Mutex<LogRing>,
}

impl BarrierLog {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            enabled: AtomicBool::new(enabled),
            ring: Mutex::new(LogRing {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity
    }

    /// Appends an entry, overwriting the oldest one once the ring is full.
    /// Returns the entry's sequence number, or `None` while disabled.
    pub fn push(
        &self,
        barrier_index: usize,
        barrier_name: &str,
        action: BarrierAction,
        member: Option<Member>,
        line: u32,
        snapshot: Option<BarrierSnapshot>,
    ) -> Option<u64> {
        if !self.is_enabled() {
            return None;
        }
        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry {
            seq,
            barrier_index,
            barrier_name: barrier_name.to_owned(),
            action,
            member,
            line,
            snapshot,
        });
        Some(seq)
    }

    /// Live entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.ring.lock().entries.iter().cloned().collect()
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.ring.lock().entries.iter().rev().take(n).cloned().collect()
    }

    /// Live entries with `seq >= cursor`, oldest first.
    pub fn since(&self, cursor: u64) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        let skip = ring.entries.partition_point(|e| e.seq < cursor);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// Sequence number of the newest entry ever written.
    pub fn latest_seq(&self) -> Option<u64> {
        self.ring.lock().next_seq.checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.ring.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ring.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::ProcessId;
    use strum::IntoEnumIterator;

    fn push_n(log: &BarrierLog, n: usize) {
        for i in 0..n {
            log.push(0, "B", BarrierAction::WalkThrough, None, i as u32, None);
        }
    }

    #[test]
    fn test_disabled_log_ignores_writes() {
        let log = BarrierLog::new(4, false);
        assert_eq!(None, log.push(0, "B", BarrierAction::AddBarrier, None, 1, None));
        assert!(log.is_empty());
        log.set_enabled(true);
        assert_eq!(Some(0), log.push(0, "B", BarrierAction::AddBarrier, None, 1, None));
    }

    #[test]
    fn test_ring_wraps() {
        let log = BarrierLog::new(3, true);
        push_n(&log, 5);
        let seqs: Vec<u64> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(vec![2, 3, 4], seqs);
        assert_eq!(Some(4), log.latest_seq());
        let recent: Vec<u64> = log.recent(2).iter().map(|e| e.seq).collect();
        assert_eq!(vec![4, 3], recent);
    }

    #[test]
    fn test_since_cursor() {
        let log = BarrierLog::new(4, true);
        push_n(&log, 6);
        let seqs: Vec<u64> = log.since(0).iter().map(|e| e.seq).collect();
        assert_eq!(vec![2, 3, 4, 5], seqs);
        let seqs: Vec<u64> = log.since(4).iter().map(|e| e.seq).collect();
        assert_eq!(vec![4, 5], seqs);
        assert!(log.since(6).is_empty());
    }

    #[test]
    fn test_clear_keeps_sequence() {
        let log = BarrierLog::new(0, true);
        assert_eq!(1, log.capacity());
        push_n(&log, 2);
        log.clear();
        assert!(log.is_empty());
        let member = Member::from(ProcessId::new(1).unwrap());
        assert_eq!(
            Some(2),
            log.push(0, "B", BarrierAction::Release, Some(member), 7, None)
        );
    }

    #[test]
    fn test_action_helpers() {
        assert!(BarrierAction::iter().count() >= 20);
        assert_eq!(
            BarrierAction::SleepBehindScheduler,
            BarrierAction::sleep(MemberKind::Scheduler, SyncPhase::Behind)
        );
        assert_eq!(
            BarrierAction::SleepLoopOutBefore,
            BarrierAction::sleep(MemberKind::Process, SyncPhase::LoopOutBefore)
        );
        assert_eq!("FoldAddBehind", BarrierAction::fold_add(1).to_string());
        assert_eq!(
            BarrierAction::EmergencyRemoveProcess,
            BarrierAction::disconnect(MemberKind::Process, true)
        );
    }
}
