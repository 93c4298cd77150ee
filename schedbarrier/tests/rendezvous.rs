use crossbeam::channel::{bounded, Receiver};
use schedbarrier::diag::BarrierAction;
use schedbarrier::member::{Member, ProcessId, SchedulerId, SyncPhase, WaitMode};
use schedbarrier::test_helper::{logging_subsystem, wait_until_sleeping};
use schedbarrier::{Arrival, BarrierError, BarrierSubsystem, WaitStatus};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn p(slot: usize) -> ProcessId {
    ProcessId::new(slot).unwrap()
}

fn s(slot: usize) -> SchedulerId {
    SchedulerId::new(slot).unwrap()
}

fn spawn_arrival(
    sub: &Arc<BarrierSubsystem>,
    index: usize,
    member: Member,
    phase: SyncPhase,
) -> (thread::JoinHandle<()>, Receiver<Arrival>) {
    let (tx, rx) = bounded(1);
    let sub = sub.clone();
    let handle = thread::spawn(move || {
        let arrival = sub.arrive(index, member, phase).unwrap();
        tx.send(arrival).unwrap();
    });
    (handle, rx)
}

#[test]
fn test_waiter_released_by_signaller() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("B1", false).unwrap();
    sub.connect_process(p(1), "B1", SyncPhase::Before, WaitMode::SignalAndWait)
        .unwrap();
    sub.connect_process(p(2), "B1", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();

    let (handle, rx) = spawn_arrival(&sub, idx, p(1).into(), SyncPhase::Before);
    wait_until_sleeping(&sub, p(1).into(), "B1");
    assert!(rx.try_recv().is_err());

    assert_eq!(Arrival::Released, sub.before_process(idx, p(2)).unwrap());
    assert_eq!(Arrival::WokenUp, rx.recv().unwrap());
    handle.join().unwrap();

    let snap = sub.barrier_snapshot("B1").unwrap();
    assert_eq!(1, snap.wait_on_counter);
    assert!(snap.banks[0].flags.is_empty());
    assert!(snap.banks[0].waiting.is_empty());
    let actions: Vec<BarrierAction> = sub.log().entries().iter().map(|e| e.action).collect();
    assert!(actions.contains(&BarrierAction::SleepBeforeProcess));
    assert!(actions.contains(&BarrierAction::WakeUp));
}

#[test]
fn test_lone_scheduler_evicted_by_emergency_cleanup() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("S", true).unwrap();
    sub.connect_scheduler(s(1), "S", SyncPhase::Before, WaitMode::SignalAndWait)
        .unwrap();

    let (handle, rx) = spawn_arrival(&sub, idx, s(1).into(), SyncPhase::Before);
    wait_until_sleeping(&sub, s(1).into(), "S");
    thread::sleep(Duration::from_millis(20));
    assert!(rx.try_recv().is_err());

    assert_eq!(1, sub.disconnect_scheduler(s(1), Some("S"), true).unwrap());
    assert_eq!(Arrival::Evicted, rx.recv().unwrap());
    handle.join().unwrap();

    let snap = sub.barrier_snapshot("S").unwrap();
    assert_eq!(0, snap.wait_on_counter);
    assert_eq!(0, snap.member_count);
    assert!(snap.scheduler_mask.is_empty());
    assert!(snap.banks[0].waiting.is_empty());
    let actions: Vec<BarrierAction> = sub.log().entries().iter().map(|e| e.action).collect();
    assert!(actions.contains(&BarrierAction::EmergencyRemoveScheduler));
    assert!(actions.contains(&BarrierAction::Evicted));
    assert!(!actions.contains(&BarrierAction::Release));
}

#[test]
fn test_crashed_peer_releases_waiter() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("C", false).unwrap();
    sub.connect_process(p(0), "C", SyncPhase::Behind, WaitMode::SignalAndWait)
        .unwrap();
    sub.connect_process(p(1), "C", SyncPhase::Behind, WaitMode::SignalAndWait)
        .unwrap();

    let (handle, rx) = spawn_arrival(&sub, idx, p(0).into(), SyncPhase::Behind);
    wait_until_sleeping(&sub, p(0).into(), "C");

    assert_eq!(
        WaitStatus::Waiting,
        sub.member_wait_status(p(0).into(), "C").unwrap()
    );
    sub.disconnect_process(p(1), None, true).unwrap();
    // released within the disconnect call itself
    assert_eq!(1, sub.barrier_snapshot("C").unwrap().wait_on_counter);
    assert_eq!(Arrival::WokenUp, rx.recv().unwrap());
    handle.join().unwrap();

    // the survivor now meets the barrier alone
    assert_eq!(Arrival::Released, sub.behind_process(idx, p(0)).unwrap());

    let entries = sub.log().entries();
    let removal = entries
        .iter()
        .find(|e| e.action == BarrierAction::EmergencyRemoveProcess)
        .unwrap();
    let release = entries
        .iter()
        .find(|e| e.action == BarrierAction::Release)
        .unwrap();
    assert!(removal.seq < release.seq);
    assert_eq!(None, release.member);
    let snap = release.snapshot.as_ref().unwrap();
    assert_eq!(1, snap.wait_on_counter);
    assert!(!snap.banks[1].masks.contains(p(1).into()));
    assert!(snap.banks[1].flags.is_empty());
}

#[test]
fn test_crashed_peer_releases_waiter_on_wait_if_alone_barrier() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("C", true).unwrap();
    sub.connect_process(p(0), "C", SyncPhase::Behind, WaitMode::SignalAndWait)
        .unwrap();
    sub.connect_process(p(1), "C", SyncPhase::Behind, WaitMode::SignalAndWait)
        .unwrap();

    let (handle, rx) = spawn_arrival(&sub, idx, p(0).into(), SyncPhase::Behind);
    wait_until_sleeping(&sub, p(0).into(), "C");

    // the crashed member's signal counts, so process 0 is not left alone
    sub.disconnect_process(p(1), None, true).unwrap();
    assert_eq!(1, sub.barrier_snapshot("C").unwrap().wait_on_counter);
    assert_eq!(
        Arrival::WokenUp,
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    );
    handle.join().unwrap();
    let actions: Vec<BarrierAction> = sub.log().entries().iter().map(|e| e.action).collect();
    assert!(actions.contains(&BarrierAction::Release));
}

#[test]
fn test_signal_only_never_blocks() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("P", false).unwrap();
    for slot in 0..3 {
        sub.connect_process(p(slot), "P", SyncPhase::Before, WaitMode::SignalOnly)
            .unwrap();
    }
    sub.connect_process(p(3), "P", SyncPhase::Before, WaitMode::SignalAndWait)
        .unwrap();
    // process 3 stays away, the others run ahead regardless
    for _ in 0..5 {
        for slot in 0..3 {
            assert_eq!(Arrival::WalkedThrough, sub.before_process(idx, p(slot)).unwrap());
        }
    }
    let snap = sub.barrier_snapshot("P").unwrap();
    assert_eq!(0, snap.wait_on_counter);
    assert!(snap.masks_contain_flags());
    assert_eq!(Arrival::Released, sub.before_process(idx, p(3)).unwrap());
    assert_eq!(1, sub.barrier_snapshot("P").unwrap().wait_on_counter);
}

#[test]
fn test_wait_if_alone_blocks_lone_process() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("W", true).unwrap();
    sub.connect_process(p(4), "W", SyncPhase::Before, WaitMode::SignalAndWait)
        .unwrap();

    let (handle, rx) = spawn_arrival(&sub, idx, p(4).into(), SyncPhase::Before);
    wait_until_sleeping(&sub, p(4).into(), "W");
    thread::sleep(Duration::from_millis(20));
    assert!(rx.try_recv().is_err());
    assert_eq!(0, sub.barrier_snapshot("W").unwrap().wait_on_counter);

    // any second arrival completes the round
    sub.connect_process(p(5), "W", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();
    assert_eq!(Arrival::Released, sub.before_process(idx, p(5)).unwrap());
    assert_eq!(Arrival::WokenUp, rx.recv().unwrap());
    handle.join().unwrap();

    // next round: process 5 is now required and arrives first, alone
    assert_eq!(Arrival::WalkedThrough, sub.before_process(idx, p(5)).unwrap());
    assert_eq!(Arrival::Released, sub.before_process(idx, p(4)).unwrap());
    assert_eq!(2, sub.barrier_snapshot("W").unwrap().wait_on_counter);
}

#[test]
fn test_mask_containment_under_load() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("M", false).unwrap();
    let procs = 4;
    for slot in 0..procs {
        sub.connect_process(p(slot), "M", SyncPhase::Before, WaitMode::SignalAndWait)
            .unwrap();
        sub.connect_process(p(slot), "M", SyncPhase::Behind, WaitMode::SignalAndWait)
            .unwrap();
    }
    let rounds = 50;
    let handles: Vec<_> = (0..procs)
        .map(|slot| {
            let sub = sub.clone();
            thread::spawn(move || {
                for _ in 0..rounds {
                    sub.before_process(idx, p(slot)).unwrap();
                    sub.behind_process(idx, p(slot)).unwrap();
                }
            })
        })
        .collect();
    let observer = {
        let sub = sub.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let snap = sub.barrier_snapshot("M").unwrap();
                assert!(snap.masks_contain_flags());
                thread::yield_now();
            }
        })
    };
    for h in handles {
        h.join().unwrap();
    }
    observer.join().unwrap();
    assert_eq!(2 * rounds, sub.barrier_snapshot("M").unwrap().wait_on_counter);
}

#[test]
fn test_membership_round_trip() {
    let sub = logging_subsystem();
    let idx = sub.add_barrier("R", false).unwrap();
    sub.connect_process(p(0), "R", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();
    sub.connect_process(p(1), "R", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();
    sub.before_process(idx, p(0)).unwrap();
    let before = sub.barrier_snapshot("R").unwrap();

    // connect then disconnect without an arrival in between
    sub.connect_process(p(2), "R", SyncPhase::Before, WaitMode::SignalAndWait)
        .unwrap();
    sub.disconnect_process(p(2), Some("R"), false).unwrap();
    let after = sub.barrier_snapshot("R").unwrap();
    assert_eq!(before.members, after.members);
    assert_eq!(before.banks, after.banks);
    assert_eq!(before.pending_add, after.pending_add);
    assert_eq!(before.pending_remove, after.pending_remove);

    // after a fold the disconnect has to take the bit back out of the bank
    sub.connect_process(p(2), "R", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();
    sub.before_process(idx, p(1)).unwrap();
    sub.before_process(idx, p(2)).unwrap();
    assert!(sub.barrier_snapshot("R").unwrap().process_mask.test(2));
    sub.disconnect_process(p(2), Some("R"), false).unwrap();
    let snap = sub.barrier_snapshot("R").unwrap();
    assert!(!snap.process_mask.test(2));
    assert_eq!(before.members, snap.members);
}

#[test]
fn test_delete_guard_is_idempotent() {
    let sub = logging_subsystem();
    sub.add_barrier("D", false).unwrap();
    sub.connect_process(p(0), "D", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();
    let before = sub.barrier_snapshot("D").unwrap();
    for _ in 0..3 {
        assert!(matches!(
            sub.delete_barrier("D"),
            Err(BarrierError::NotEmpty { members: 1, .. })
        ));
        assert_eq!(before, sub.barrier_snapshot("D").unwrap());
    }
    sub.disconnect_process(p(0), None, false).unwrap();
    sub.delete_barrier("D").unwrap();
    assert!(matches!(
        sub.barrier_snapshot("D"),
        Err(BarrierError::UnknownBarrier(_))
    ));
}

#[test]
fn test_loop_out_phases_share_banks() {
    let sub = Arc::new(logging_subsystem());
    let idx = sub.add_barrier("L", false).unwrap();
    sub.connect_process(p(0), "L", SyncPhase::LoopOutBefore, WaitMode::SignalAndWait)
        .unwrap();
    sub.connect_process(p(1), "L", SyncPhase::Before, WaitMode::SignalOnly)
        .unwrap();

    let sleeper = {
        let sub = sub.clone();
        thread::spawn(move || sub.loop_out_before_process(idx, p(0)).unwrap())
    };
    wait_until_sleeping(&sub, p(0).into(), "L");
    assert_eq!(Arrival::Released, sub.before_process(idx, p(1)).unwrap());
    assert_eq!(Arrival::WokenUp, sleeper.join().unwrap());
    let actions: Vec<BarrierAction> = sub.log().entries().iter().map(|e| e.action).collect();
    assert!(actions.contains(&BarrierAction::SleepLoopOutBefore));
}
