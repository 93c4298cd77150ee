// Inspection and configuration tool for scheduler barriers.
// Sub-commands
// - list: barrier definitions and member associations
// - add-barrier / remove-barrier: edit barrier definitions
// - associate / dissociate: edit member associations
// - simulate: run the configured schedulers on threads and dump the barriers
use barrier_inspect::common::{cli, simulate, utils};
use clap::Parser;
use log::info;
use schedbarrier::associations::{
    self, associated_members, associations, barrier_definitions, scheduler_for_process,
};
use schedbarrier::ini::IniStore;
use schedbarrier::member::MemberKind;

fn list(store: &IniStore) {
    println!("Barriers:");
    for (i, def) in barrier_definitions(store) {
        match def {
            Ok(def) => println!(
                "  [{}] {}{}",
                i,
                def.name,
                if def.wait_if_alone { " (WaitIfAlone)" } else { "" }
            ),
            Err(e) => println!("  [{}] <invalid: {}>", i, e),
        }
    }
    for kind in [MemberKind::Scheduler, MemberKind::Process] {
        for member in associated_members(store, kind) {
            match scheduler_for_process(store, &member).filter(|_| kind == MemberKind::Process) {
                Some(s) => println!("{} {} (on {}):", kind, member, s),
                None => println!("{} {}:", kind, member),
            }
            for a in associations(store, kind, &member) {
                println!("  {:<14} {:<14} {}", a.phase.to_string(), a.mode.to_string(), a.barrier);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::InspectCli::parse();
    utils::init_logging(&args.log_level);
    let mut store = utils::load_store(&args.config)?;

    let modified = match &args.command {
        cli::Command::List => {
            list(&store);
            false
        }
        cli::Command::AddBarrier {
            name,
            wait_if_alone,
        } => {
            let index = associations::add_barrier_definition(&mut store, name, *wait_if_alone)?;
            info!("barrier '{}' added as Barrier_{}", name, index);
            true
        }
        cli::Command::RemoveBarrier { name } => {
            associations::remove_barrier_definition(&mut store, name)?;
            info!("barrier '{}' removed", name);
            true
        }
        cli::Command::Associate {
            kind,
            member,
            barrier,
            phase,
            mode,
        } => {
            associations::add_association(&mut store, *kind, member, barrier, *phase, *mode)?;
            true
        }
        cli::Command::Dissociate {
            kind,
            member,
            barrier,
            phase,
        } => {
            associations::remove_association(&mut store, *kind, member, barrier, *phase)?;
            true
        }
        cli::Command::Simulate {
            cycles,
            json,
            recent,
        } => {
            let report = simulate::simulate(&store, *cycles, *recent)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for s in &report.schedulers {
                    println!(
                        "{} {:?}: released={} walked_through={} woken_up={} evicted={} sleep_ticks={}",
                        s.scheduler,
                        s.processes,
                        s.released,
                        s.walked_through,
                        s.woken_up,
                        s.evicted,
                        s.sleep_ticks
                    );
                }
                for snap in &report.snapshots {
                    print!("{}", utils::format_snapshot(snap));
                }
                for entry in &report.log {
                    println!("{}", utils::format_log_entry(entry));
                }
            }
            false
        }
    };

    if modified {
        store.save(&args.config)?;
        info!("saved {}", args.config);
    }
    Ok(())
}
