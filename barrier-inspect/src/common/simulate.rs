//! Threaded demo driver: one OS thread per scheduler, each running its
//! processes' arrivals for a number of cycles.
//!
//! A cycle of one scheduler thread is
//!
//! ```text
//! scheduler Before
//!   for each process: Before, LoopOutBefore, LoopOutBehind, Behind
//! scheduler Behind
//! ```
//!
//! Processes of one scheduler run one after the other on its thread, so a
//! configuration where two of them wait for each other at the same barrier
//! never completes.

use std::thread;

use crossbeam::channel::unbounded;
use log::{debug, info};
use schedbarrier::associations::{associated_members, scheduler_for_process};
use schedbarrier::barrier::membership::MemberBarriers;
use schedbarrier::config::Config;
use schedbarrier::diag::LogEntry;
use schedbarrier::ini::IniStore;
use schedbarrier::member::{MemberKind, SyncPhase};
use schedbarrier::{Arrival, BarrierSnapshot, BarrierSubsystem};
use serde::Serialize;

/// Scheduler that runs processes with no `SchedulerForProcess` entry when no
/// scheduler is configured at all.
pub const DEFAULT_SCHEDULER: &str = "Scheduler";

const PROCESS_PHASES: [SyncPhase; 4] = [
    SyncPhase::Before,
    SyncPhase::LoopOutBefore,
    SyncPhase::LoopOutBehind,
    SyncPhase::Behind,
];

#[derive(Debug, Default, Clone, Serialize)]
pub struct SchedulerReport {
    pub scheduler: String,
    pub processes: Vec<String>,
    pub released: u64,
    pub walked_through: u64,
    pub woken_up: u64,
    pub evicted: u64,
    pub sleep_ticks: u64,
}

impl SchedulerReport {
    fn tally(&mut self, arrivals: &[Arrival]) {
        for arrival in arrivals {
            match arrival {
                Arrival::Released => self.released += 1,
                Arrival::WalkedThrough => self.walked_through += 1,
                Arrival::WokenUp => self.woken_up += 1,
                Arrival::Evicted => self.evicted += 1,
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub cycles: u64,
    pub schedulers: Vec<SchedulerReport>,
    pub snapshots: Vec<BarrierSnapshot>,
    pub log: Vec<LogEntry>,
}

struct SchedulerGroup {
    name: String,
    scheduler: MemberBarriers,
    processes: Vec<(String, MemberBarriers)>,
}

/// Assigns every configured process to a scheduler, in configuration order.
fn plan(store: &IniStore) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = associated_members(store, MemberKind::Scheduler)
        .into_iter()
        .map(|s| (s, Vec::new()))
        .collect();
    for process in associated_members(store, MemberKind::Process) {
        let scheduler = scheduler_for_process(store, &process)
            .map(str::to_owned)
            .or_else(|| groups.first().map(|(s, _)| s.clone()))
            .unwrap_or_else(|| DEFAULT_SCHEDULER.to_owned());
        match groups.iter_mut().find(|(s, _)| *s == scheduler) {
            Some((_, procs)) => procs.push(process),
            None => groups.push((scheduler, vec![process])),
        }
    }
    groups
}

fn attach(
    subsystem: &BarrierSubsystem,
    store: &IniStore,
    plan: Vec<(String, Vec<String>)>,
) -> anyhow::Result<Vec<SchedulerGroup>> {
    let mut groups = Vec::with_capacity(plan.len());
    for (name, procs) in plan {
        let scheduler = subsystem.attach_from_store(store, &name, MemberKind::Scheduler)?;
        let mut processes = Vec::with_capacity(procs.len());
        for p in procs {
            let attached = subsystem.attach_from_store(store, &p, MemberKind::Process)?;
            processes.push((p, attached));
        }
        groups.push(SchedulerGroup {
            name,
            scheduler,
            processes,
        });
    }
    Ok(groups)
}

fn run_scheduler(
    subsystem: &BarrierSubsystem,
    group: SchedulerGroup,
    cycles: u64,
) -> anyhow::Result<SchedulerReport> {
    let mut report = SchedulerReport {
        scheduler: group.name.clone(),
        processes: group.processes.iter().map(|(n, _)| n.clone()).collect(),
        ..Default::default()
    };
    let mut ticks = 0u64;
    for cycle in 0..cycles {
        let arrivals =
            group
                .scheduler
                .arrive_all_with(subsystem, SyncPhase::Before, &mut || ticks += 1)?;
        report.tally(&arrivals);
        for (_, process) in &group.processes {
            for phase in PROCESS_PHASES {
                report.tally(&process.arrive_all(subsystem, phase)?);
            }
        }
        report.tally(&group.scheduler.arrive_all(subsystem, SyncPhase::Behind)?);
        debug!("scheduler '{}' finished cycle {}", group.name, cycle);
    }
    report.sleep_ticks = ticks;
    // leaving releases peers that still wait for this thread's members
    for (_, process) in group.processes {
        process.detach_all(subsystem, false)?;
    }
    group.scheduler.detach_all(subsystem, false)?;
    Ok(report)
}

pub fn simulate(store: &IniStore, cycles: u64, recent: usize) -> anyhow::Result<SimulationReport> {
    let mut config = Config::from_store(store)?;
    config.set_logging_enabled(true);
    let subsystem = BarrierSubsystem::new(config);
    subsystem.load_barriers(store);
    let groups = attach(&subsystem, store, plan(store))?;
    info!(
        "simulating {} schedulers for {} cycles",
        groups.len(),
        cycles
    );

    let (tx, rx) = unbounded();
    thread::scope(|s| {
        for group in groups {
            let tx = tx.clone();
            let subsystem = &subsystem;
            s.spawn(move || {
                let name = group.name.clone();
                let result = run_scheduler(subsystem, group, cycles);
                if let Err(e) = &result {
                    log::error!("scheduler '{}' stopped: {}", name, e);
                }
                let _ = tx.send(result);
            });
        }
    });
    drop(tx);

    let mut schedulers = rx.iter().collect::<anyhow::Result<Vec<_>>>()?;
    schedulers.sort_by(|a, b| a.scheduler.cmp(&b.scheduler));
    Ok(SimulationReport {
        cycles,
        schedulers,
        snapshots: subsystem.snapshots(),
        log: subsystem.log().recent(recent),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SCHEDULERS: &str = "\
[SchedulerBarriers]
Barrier_0=Sync
Barrier_1=Data
BarriersBeforeSignalAndWaitForScheduler S1=Sync
BarriersBeforeSignalAndWaitForScheduler S2=Sync
BarriersBehindOnlySignalForProcess Producer=Data
BarriersBehindSignalAndWaitForProcess Consumer=Data
SchedulerForProcess Producer=S1
SchedulerForProcess Consumer=S2
";

    #[test]
    fn test_plan_assigns_processes() {
        let store = IniStore::parse(TWO_SCHEDULERS).unwrap();
        assert_eq!(
            vec![
                ("S1".to_owned(), vec!["Producer".to_owned()]),
                ("S2".to_owned(), vec!["Consumer".to_owned()]),
            ],
            plan(&store)
        );
        let lonely = IniStore::parse(
            "[SchedulerBarriers]\nBarrier_0=X\nBarriersBeforeOnlySignalForProcess P=X\n",
        )
        .unwrap();
        assert_eq!(
            vec![(DEFAULT_SCHEDULER.to_owned(), vec!["P".to_owned()])],
            plan(&lonely)
        );
    }

    #[test]
    fn test_two_schedulers_meet_every_cycle() {
        let store = IniStore::parse(TWO_SCHEDULERS).unwrap();
        let report = simulate(&store, 5, 8).unwrap();
        assert_eq!(2, report.schedulers.len());
        for snap in &report.snapshots {
            assert_eq!(5, snap.wait_on_counter, "barrier {}", snap.name);
            assert_eq!(0, snap.member_count);
        }
        assert!(report.log.len() <= 8);
        let consumer = &report.schedulers[1];
        assert_eq!(vec!["Consumer".to_owned()], consumer.processes);
        assert_eq!(0, consumer.evicted);
    }
}
