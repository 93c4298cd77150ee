//! Barrier definitions and member associations in the configuration store.
//!
//! Everything lives in the `[SchedulerBarriers]` section:
//!
//! ```text
//! [SchedulerBarriers]
//! Barrier_0=Sync
//! Barrier_1=Gate,WaitIfAlone
//! BarriersBeforeSignalAndWaitForScheduler Scheduler=Sync
//! BarriersBehindOnlySignalForProcess Model=Sync;Gate
//! BarriersLoopOutBeforeSignalAndWaitForProcess Model=Gate
//! SchedulerForProcess Model=Scheduler
//! ```
//!
//! Definitions are read in index order until the first missing index, so
//! removing one renumbers the tail. An association key names the phase, the
//! wait mode, the member kind and the member; its value lists barrier names
//! separated by `;` or `,`.

use log::debug;
use strum::IntoEnumIterator;

use crate::def::{
    BARRIER_KEY_PREFIX, BARRIER_SECTION, MAX_BARRIER_NAME_LEN, SCHEDULER_FOR_PROCESS_KEY,
    WAIT_IF_ALONE_MARKER,
};
use crate::error::{BarrierError, Result};
use crate::ini::IniStore;
use crate::member::{MemberKind, SyncPhase, WaitMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierDefinition {
    pub name: String,
    pub wait_if_alone: bool,
}

impl BarrierDefinition {
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(BarrierError::InvalidConfig(format!(
                "empty barrier name in '{}'",
                value
            )));
        }
        let mut wait_if_alone = false;
        for flag in parts {
            if flag.eq_ignore_ascii_case(WAIT_IF_ALONE_MARKER) {
                wait_if_alone = true;
            } else if !flag.is_empty() {
                return Err(BarrierError::InvalidConfig(format!(
                    "unknown barrier flag '{}' in '{}'",
                    flag, value
                )));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            wait_if_alone,
        })
    }

    pub fn render(&self) -> String {
        if self.wait_if_alone {
            format!("{},{}", self.name, WAIT_IF_ALONE_MARKER)
        } else {
            self.name.clone()
        }
    }
}

/// One barrier a member meets at one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub barrier: String,
    pub phase: SyncPhase,
    pub mode: WaitMode,
}

fn definition_key(index: usize) -> String {
    format!("{}{}", BARRIER_KEY_PREFIX, index)
}

/// Reads `Barrier_0`, `Barrier_1`, ... up to the first missing index.
///
/// Returns each entry together with its parse result so that the caller can
/// report broken entries without losing the rest.
pub fn barrier_definitions(store: &IniStore) -> Vec<(usize, Result<BarrierDefinition>)> {
    (0..)
        .map_while(|i| {
            store
                .get(BARRIER_SECTION, &definition_key(i))
                .map(|v| (i, BarrierDefinition::parse(v)))
        })
        .collect()
}

/// Appends a barrier definition and returns its index.
pub fn add_barrier_definition(
    store: &mut IniStore,
    name: &str,
    wait_if_alone: bool,
) -> Result<usize> {
    if name.len() > MAX_BARRIER_NAME_LEN {
        return Err(BarrierError::NameTooLong(name.to_owned()));
    }
    let defs = barrier_definitions(store);
    if defs
        .iter()
        .any(|(_, d)| d.as_ref().is_ok_and(|d| d.name == name))
    {
        return Err(BarrierError::DuplicateName(name.to_owned()));
    }
    let index = defs.len();
    let def = BarrierDefinition {
        name: name.to_owned(),
        wait_if_alone,
    };
    store.set(BARRIER_SECTION, &definition_key(index), &def.render());
    debug!("config: barrier '{}' defined as {}", name, definition_key(index));
    Ok(index)
}

/// Removes a barrier definition, shifting later definitions down by one.
pub fn remove_barrier_definition(store: &mut IniStore, name: &str) -> Result<()> {
    let values: Vec<String> = (0..)
        .map_while(|i| store.get(BARRIER_SECTION, &definition_key(i)).map(str::to_owned))
        .collect();
    let pos = values
        .iter()
        .position(|v| BarrierDefinition::parse(v).is_ok_and(|d| d.name == name))
        .ok_or_else(|| BarrierError::UnknownBarrier(name.to_owned()))?;
    for i in pos..values.len() - 1 {
        store.set(BARRIER_SECTION, &definition_key(i), &values[i + 1]);
    }
    store.remove(BARRIER_SECTION, &definition_key(values.len() - 1));
    debug!("config: barrier '{}' removed from {}", name, definition_key(pos));
    Ok(())
}

/// `Barriers<Phase><Mode>For<Kind> <member>`
pub fn association_key(kind: MemberKind, phase: SyncPhase, mode: WaitMode, member: &str) -> String {
    let phase: &'static str = phase.into();
    let mode: &'static str = mode.into();
    let kind: &'static str = kind.into();
    format!("Barriers{}{}For{} {}", phase, mode, kind, member)
}

fn split_names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

const MODES: [WaitMode; 2] = [WaitMode::SignalAndWait, WaitMode::SignalOnly];

fn phases_for(kind: MemberKind) -> impl Iterator<Item = SyncPhase> {
    SyncPhase::iter().filter(move |p| p.allowed_for(kind))
}

/// All associations of one member, ordered by phase, then wait mode, then
/// position in the list.
pub fn associations(store: &IniStore, kind: MemberKind, member: &str) -> Vec<Association> {
    let mut out = Vec::new();
    for phase in phases_for(kind) {
        for mode in MODES {
            let key = association_key(kind, phase, mode, member);
            if let Some(value) = store.get(BARRIER_SECTION, &key) {
                out.extend(split_names(value).map(|barrier| Association {
                    barrier: barrier.to_owned(),
                    phase,
                    mode,
                }));
            }
        }
    }
    out
}

/// Names of all members of `kind` that have at least one association key,
/// in order of first appearance.
pub fn associated_members(store: &IniStore, kind: MemberKind) -> Vec<String> {
    let suffix = format!("For{} ", kind);
    let mut names: Vec<String> = Vec::new();
    for key in store.keys(BARRIER_SECTION) {
        if !key.starts_with("Barriers") {
            continue;
        }
        if let Some((_, name)) = key.split_once(suffix.as_str()) {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_owned());
            }
        }
    }
    names
}

/// Adds `barrier` to the member's list for `phase`/`mode`. The barrier is
/// dropped from the opposite wait-mode list of the same phase.
pub fn add_association(
    store: &mut IniStore,
    kind: MemberKind,
    member: &str,
    barrier: &str,
    phase: SyncPhase,
    mode: WaitMode,
) -> Result<()> {
    if !phase.allowed_for(kind) {
        return Err(BarrierError::InvalidConfig(format!(
            "phase {} is not available to {} '{}'",
            phase, kind, member
        )));
    }
    let key = association_key(kind, phase, mode, member);
    let mut names: Vec<String> = store
        .get(BARRIER_SECTION, &key)
        .map(|v| split_names(v).map(str::to_owned).collect())
        .unwrap_or_default();
    if names.iter().any(|n| n == barrier) {
        return Err(BarrierError::AlreadyAssociated {
            member: member.to_owned(),
            name: barrier.to_owned(),
            phase,
        });
    }
    for other in MODES.into_iter().filter(|m| *m != mode) {
        remove_from_list(store, &association_key(kind, phase, other, member), barrier);
    }
    names.push(barrier.to_owned());
    store.set(BARRIER_SECTION, &key, &names.join(";"));
    debug!("config: {} '{}' meets '{}' at {} ({})", kind, member, barrier, phase, mode);
    Ok(())
}

/// Removes `barrier` from the member's lists for `phase` (both wait modes).
pub fn remove_association(
    store: &mut IniStore,
    kind: MemberKind,
    member: &str,
    barrier: &str,
    phase: SyncPhase,
) -> Result<()> {
    let removed = MODES.into_iter().fold(false, |acc, mode| {
        remove_from_list(store, &association_key(kind, phase, mode, member), barrier) || acc
    });
    if !removed {
        return Err(BarrierError::NotAssociated {
            member: member.to_owned(),
            name: barrier.to_owned(),
        });
    }
    Ok(())
}

fn remove_from_list(store: &mut IniStore, key: &str, barrier: &str) -> bool {
    let Some(value) = store.get(BARRIER_SECTION, key) else {
        return false;
    };
    let names: Vec<String> = split_names(value).map(str::to_owned).collect();
    if !names.iter().any(|n| n == barrier) {
        return false;
    }
    let rest: Vec<String> = names.into_iter().filter(|n| n != barrier).collect();
    if rest.is_empty() {
        store.remove(BARRIER_SECTION, key);
    } else {
        let joined = rest.join(";");
        store.set(BARRIER_SECTION, key, &joined);
    }
    true
}

pub fn scheduler_for_process<'a>(store: &'a IniStore, process: &str) -> Option<&'a str> {
    store.get(
        BARRIER_SECTION,
        &format!("{} {}", SCHEDULER_FOR_PROCESS_KEY, process),
    )
}

pub fn set_scheduler_for_process(store: &mut IniStore, process: &str, scheduler: &str) {
    store.set(
        BARRIER_SECTION,
        &format!("{} {}", SCHEDULER_FOR_PROCESS_KEY, process),
        scheduler,
    );
}
