//! SchedBarrier: named rendezvous barriers for a co-simulation host.
//!
//! # Overview
//! Schedulers (OS threads) drive cooperative processes through cyclic phases.
//! Members that exchange data must meet at barriers so that values are
//! produced and consumed in a defined order. This crate provides:
//! - A fixed-capacity registry of named barriers
//! - Membership changes that never disturb a rendezvous in flight
//! - Signal-only and signal-and-wait members
//! - Emergency cleanup that frees the peers of a crashed member
//! - A diagnostic log of every transition, with barrier snapshots
//!
//! # Architecture
//!
//! ## Core Components
//! - [`BarrierSubsystem`]: owns the registry, the diagnostic log and the
//!   member directory
//!   - Registry operations and inspection in [`subsystem`]
//!   - Rendezvous entry points in [`barrier::rendezvous`]
//!   - Connect/disconnect and per-member attachment lists in
//!     [`barrier::membership`]
//! - [`barrier::Barrier`]: two banks, each with its own mutex, condition
//!   variable, required masks and arrival flags
//!
//! ## Supporting Components
//! - [`member`]: process and scheduler references, wait modes and phases
//! - [`directory`]: slot id allocation for named members
//! - [`diag`]: the diagnostic ring buffer
//! - [`ini`], [`associations`], [`config`]: the configuration store and the
//!   barrier keys kept in it
//!
//! # Example Usage
//! ```no_run
//! use schedbarrier::config::Config;
//! use schedbarrier::member::{ProcessId, SyncPhase, WaitMode};
//! use schedbarrier::BarrierSubsystem;
//!
//! let subsystem = BarrierSubsystem::new(Config::default());
//! let index = subsystem.add_barrier("Sync", false).unwrap();
//! let p0 = ProcessId::new(0).unwrap();
//! subsystem
//!     .connect_process(p0, "Sync", SyncPhase::Before, WaitMode::SignalAndWait)
//!     .unwrap();
//! subsystem.before_process(index, p0).unwrap();
//! ```

pub mod associations;
pub mod barrier;
pub mod config;
pub mod def;
pub mod diag;
pub mod directory;
pub mod error;
pub mod ini;
pub mod member;
pub mod subsystem;
pub mod utils;

// for test
pub mod test_helper;

pub use barrier::snapshot::{BankSnapshot, BarrierSnapshot};
pub use barrier::{Arrival, BarrierState, KindMasks, MemberEntry, WaitStatus};
pub use error::{BarrierError, Result};
pub use subsystem::BarrierSubsystem;
