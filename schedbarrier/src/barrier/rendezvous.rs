//! The rendezvous engine.
//!
//! An arrival runs through these steps, holding the registry lock and then
//! the bank lock until it returns or goes to sleep:
//!
//! 1. Fold: pending removes of the bank are applied, and pending adds of the
//!    arriving member's kind are applied if no arrival of the current round
//!    has been recorded yet.
//! 2. Contribute: the member's bit is OR-ed into the flags, masked by the
//!    bank's required mask.
//! 3. WaitIfAlone: a lone arrival on a wait-if-alone barrier never releases
//!    the bank.
//! 4. Release: if the flags cover the masks, the flags are cleared, the
//!    generation and the rendezvous counter advance and every sleeper wakes.
//! 5. Otherwise a signal-only member returns at once and a signal-and-wait
//!    member drops the registry lock and sleeps until the generation changes
//!    or it is evicted.
//!
//! Each step's diagnostic snapshot is taken while these locks are held and
//! written to the log once they are released.

use log::{debug, trace};
use parking_lot::MutexGuard;
use std::sync::Arc;

use super::bank::{Bank, BankState, Settle};
use super::snapshot::BankSnapshot;
use super::{Arrival, Barrier};
use crate::def::BANK_COUNT;
use crate::diag::BarrierAction;
use crate::error::{BarrierError, Result};
use crate::member::{Member, ProcessId, SchedulerId, SyncPhase, WaitMode};
use crate::subsystem::{BarrierSubsystem, Traces};

impl BarrierSubsystem {
    pub fn before_process(&self, index: usize, process: ProcessId) -> Result<Arrival> {
        self.arrive(index, process.into(), SyncPhase::Before)
    }

    pub fn behind_process(&self, index: usize, process: ProcessId) -> Result<Arrival> {
        self.arrive(index, process.into(), SyncPhase::Behind)
    }

    pub fn loop_out_before_process(&self, index: usize, process: ProcessId) -> Result<Arrival> {
        self.arrive(index, process.into(), SyncPhase::LoopOutBefore)
    }

    pub fn loop_out_behind_process(&self, index: usize, process: ProcessId) -> Result<Arrival> {
        self.arrive(index, process.into(), SyncPhase::LoopOutBehind)
    }

    /// Arrival of a scheduler before its cycle. While the scheduler sleeps,
    /// `on_sleep` runs every `sleep_callback_interval` with the bank lock
    /// released.
    pub fn before_scheduler_cycle(
        &self,
        index: usize,
        scheduler: SchedulerId,
        on_sleep: Option<&mut dyn FnMut()>,
    ) -> Result<Arrival> {
        self.arrive_with(index, scheduler.into(), SyncPhase::Before, on_sleep)
    }

    pub fn behind_scheduler_cycle(&self, index: usize, scheduler: SchedulerId) -> Result<Arrival> {
        self.arrive(index, scheduler.into(), SyncPhase::Behind)
    }

    pub fn arrive(&self, index: usize, member: Member, phase: SyncPhase) -> Result<Arrival> {
        self.arrive_with(index, member, phase, None)
    }

    /// Performs the member's final arrival, then removes it from the barrier
    /// so that it takes no part in any later round.
    pub fn arrive_and_disconnect(
        &self,
        index: usize,
        member: Member,
        phase: SyncPhase,
    ) -> Result<Arrival> {
        let arrival = self.arrive(index, member, phase)?;
        let name = self.barrier_at(index)?.name().to_owned();
        self.disconnect(member, Some(&name), false)?;
        Ok(arrival)
    }

    pub fn arrive_with(
        &self,
        index: usize,
        member: Member,
        phase: SyncPhase,
        mut on_sleep: Option<&mut dyn FnMut()>,
    ) -> Result<Arrival> {
        if !phase.allowed_for(member.kind()) {
            return Err(BarrierError::InvalidPhase { member, phase });
        }
        let bank_idx = phase.bank();
        let mut traces = Traces::new();

        let mut table = self.table.lock();
        let slot = table
            .get_mut(index)
            .ok_or_else(|| BarrierError::UnknownBarrier(format!("#{}", index)))?;
        let mode = slot
            .wait_mode(member, phase)
            .ok_or_else(|| BarrierError::NotAssociated {
                member: member.to_string(),
                name: slot.name().to_owned(),
            })?;
        let barrier = slot.barrier.clone();
        let bank = barrier.bank(bank_idx);
        let mut state = bank.state.lock();
        let departed = slot.fold_removes(bank_idx, &mut state);
        if !departed.is_empty() {
            traces.push(self.trace_holding(
                slot,
                bank_idx,
                &state,
                BarrierAction::FoldRemove,
                Some(member),
                line!(),
            ));
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
            }
        }
        if state.flags.is_empty() {
            let added = slot.fold_adds(bank_idx, member.kind(), &mut state);
            if !added.is_empty() {
                debug!("barrier '{}' bank {}: folded {:?}", barrier.name(), bank_idx, added);
                traces.push(self.trace_holding(
                    slot,
                    bank_idx,
                    &state,
                    BarrierAction::fold_add(bank_idx),
                    Some(member),
                    line!(),
                ));
            }
        }
        barrier.set_switch(bank_idx);

        state.contribute(member);
        let lone = barrier.wait_if_alone() && state.is_lone(member);
        let outcome = if !lone && state.is_satisfied() {
            state.release();
            self.complete(&barrier, bank_idx);
            traces.push(self.trace_holding(
                slot,
                bank_idx,
                &state,
                BarrierAction::Release,
                Some(member),
                line!(),
            ));
            drop(table);
            drop(state);
            self.emit_all(traces);
            self.settle_removals(&barrier);
            Arrival::Released
        } else if mode == WaitMode::SignalOnly {
            traces.push(self.trace_holding(
                slot,
                bank_idx,
                &state,
                BarrierAction::WalkThrough,
                Some(member),
                line!(),
            ));
            drop(table);
            drop(state);
            self.emit_all(traces);
            Arrival::WalkedThrough
        } else {
            let generation = state.generation;
            state.waiting.insert(member);
            traces.push(self.trace_holding(
                slot,
                bank_idx,
                &state,
                BarrierAction::sleep(member.kind(), phase),
                Some(member),
                line!(),
            ));
            drop(table);
            MutexGuard::unlocked(&mut state, || self.emit_all(traces));
            let outcome = self.sleep(bank, member, generation, &mut state, &mut on_sleep);
            let woken = BankSnapshot::from(&*state);
            drop(state);
            let action = match outcome {
                Arrival::Evicted => BarrierAction::Evicted,
                _ => BarrierAction::WakeUp,
            };
            self.record_bank(&barrier, bank_idx, woken, action, Some(member), line!());
            outcome
        };
        trace!("{} at '{}' {}: {}", member, barrier.name(), phase, outcome);
        Ok(outcome)
    }

    /// Bookkeeping of a bank that was just released. Called with the bank
    /// lock held.
    pub(crate) fn complete(&self, barrier: &Barrier, bank_idx: usize) {
        let count = barrier.count_rendezvous();
        barrier.bank(bank_idx).cond.notify_all();
        debug!(
            "barrier '{}' bank {} released, rendezvous #{}",
            barrier.name(),
            bank_idx,
            count
        );
    }

    /// Sleeps until the bank leaves `generation` or the member is evicted.
    fn sleep(
        &self,
        bank: &Bank,
        member: Member,
        generation: u64,
        state: &mut MutexGuard<'_, BankState>,
        on_sleep: &mut Option<&mut dyn FnMut()>,
    ) -> Arrival {
        loop {
            if state.evicted.contains(member) {
                state.evicted.remove(member);
                state.waiting.remove(member);
                return Arrival::Evicted;
            }
            if state.generation != generation {
                state.waiting.remove(member);
                return Arrival::WokenUp;
            }
            match on_sleep.as_mut() {
                Some(callback) => {
                    let interval = self.config().sleep_callback_interval;
                    if bank.cond.wait_for(state, interval).timed_out() {
                        MutexGuard::unlocked(state, || callback());
                    }
                }
                None => bank.cond.wait(state),
            }
        }
    }

    /// Applies removals queued while the caller held a bank, then re-checks
    /// both banks. Must be called without any bank lock held.
    pub(crate) fn settle_removals(&self, barrier: &Arc<Barrier>) {
        let mut traces = Traces::new();
        {
            let mut table = self.table.lock();
            let Some(slot) = table.slot_of_mut(barrier) else {
                return;
            };
            for bank_idx in 0..BANK_COUNT {
                if slot.pending_remove[bank_idx].is_empty() {
                    continue;
                }
                let mut state = barrier.bank(bank_idx).state.lock();
                let departed = slot.fold_removes(bank_idx, &mut state);
                traces.push(self.trace_holding(
                    slot,
                    bank_idx,
                    &state,
                    BarrierAction::FoldRemove,
                    None,
                    line!(),
                ));
                if state.settle(barrier.wait_if_alone(), &departed) == Settle::Released {
                    self.complete(barrier, bank_idx);
                    traces.push(self.trace_holding(
                        slot,
                        bank_idx,
                        &state,
                        BarrierAction::Release,
                        None,
                        line!(),
                    ));
                }
            }
        }
        self.emit_all(traces);
    }
}
