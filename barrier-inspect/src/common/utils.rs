use schedbarrier::diag::LogEntry;
use schedbarrier::ini::IniStore;
use schedbarrier::BarrierSnapshot;
use std::fmt::Write as _;
use std::path::Path;

pub fn init_logging(max_level: &str) {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(max_level));
}

/// Loads the store, or starts an empty one if the file does not exist yet.
pub fn load_store(path: &str) -> anyhow::Result<IniStore> {
    if Path::new(path).exists() {
        Ok(IniStore::load(path)?)
    } else {
        log::info!("{} not found, starting from an empty configuration", path);
        Ok(IniStore::new())
    }
}

pub fn format_snapshot(snap: &BarrierSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "#{} {} [{}{}] members={} rendezvous={} switch={}",
        snap.index,
        snap.name,
        snap.state,
        if snap.wait_if_alone { ", WaitIfAlone" } else { "" },
        snap.member_count,
        snap.wait_on_counter,
        snap.switch,
    );
    let _ = writeln!(
        out,
        "    mask      scheduler={} process={}",
        snap.scheduler_mask, snap.process_mask
    );
    for (i, bank) in snap.banks.iter().enumerate() {
        let _ = writeln!(
            out,
            "    bank {}    flags s={} p={}  waiting s={} p={}  generation={}",
            i,
            bank.flags.scheduler,
            bank.flags.process,
            bank.waiting.scheduler,
            bank.waiting.process,
            bank.generation,
        );
    }
    for entry in &snap.members {
        let _ = writeln!(out, "    {} {} {}", entry.member, entry.phase, entry.mode);
    }
    out
}

pub fn format_log_entry(entry: &LogEntry) -> String {
    let member = entry
        .member
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_owned());
    let counter = entry
        .snapshot
        .as_ref()
        .map(|s| s.wait_on_counter.to_string())
        .unwrap_or_else(|| "-".to_owned());
    format!(
        "{:>6} {:<12} {:<26} {:<14} line={} rendezvous={}",
        entry.seq,
        entry.barrier_name,
        entry.action.to_string(),
        member,
        entry.line,
        counter
    )
}
