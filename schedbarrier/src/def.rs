//! Core definitions and constants for the barrier subsystem.
//!
//! This module contains the capacity limits and configuration key names used
//! throughout the crate, including:
//! - Registry and membership capacities
//! - Diagnostic log sizing
//! - Configuration section and key prefixes
//!
//! # Capacities
//! The registry keeps the fixed-capacity layout of the scheduler it was built
//! for: a small table of barriers, each holding a bounded member list. The
//! limits below are the defaults; [`crate::config::Config`] can override the
//! registry and member table sizes, but never beyond [`MAX_MEMBER_SLOTS`],
//! which is bounded by the width of a [`crate::utils::mask::MemberMask`].

/// Default number of barriers the registry can hold.
pub const MAX_BARRIERS: usize = 8;

/// Default number of member entries (process or scheduler) per barrier.
pub const MAX_MEMBERS_PER_BARRIER: usize = 64;

/// Maximum length of a barrier name in bytes.
pub const MAX_BARRIER_NAME_LEN: usize = 63;

/// Number of distinct slot ids per member kind.
/// Processes and schedulers have independent slot spaces.
pub const MAX_MEMBER_SLOTS: usize = 64;

/// Number of banks (inner barriers) per barrier.
pub const BANK_COUNT: usize = 2;

/// Default capacity of the diagnostic log ring buffer.
pub const LOG_CAPACITY: usize = 512;

/// Default interval between bookkeeping callbacks of a sleeping scheduler, in milliseconds.
pub const SLEEP_CALLBACK_INTERVAL_MS: u64 = 10;

/// Section of the configuration store holding barrier definitions and associations.
pub const BARRIER_SECTION: &str = "SchedulerBarriers";

/// Prefix of the ordered barrier definition keys (`Barrier_0`, `Barrier_1`, ...).
pub const BARRIER_KEY_PREFIX: &str = "Barrier_";

/// Suffix marking a barrier definition as wait-if-alone.
pub const WAIT_IF_ALONE_MARKER: &str = "WaitIfAlone";

/// Key prefix mapping a process to the scheduler that runs it.
pub const SCHEDULER_FOR_PROCESS_KEY: &str = "SchedulerForProcess";
