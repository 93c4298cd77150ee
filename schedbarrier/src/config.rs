//! Configuration module for the barrier subsystem.
//!
//! This module provides the tuning knobs of a [`crate::BarrierSubsystem`]:
//! - Registry and member table capacities
//! - Diagnostic log sizing and enablement
//! - The bookkeeping interval of a sleeping scheduler
//!
//! # Sources
//! A `Config` is either built in code ([`Config::default`], [`Config::new`])
//! or read from the `[SchedulerBarriers]` section of an [`IniStore`]
//! ([`Config::from_store`]), where every key is optional:
//!
//! ```text
//! [SchedulerBarriers]
//! BarrierLogging=Yes
//! BarrierLogSize=1024
//! MaxBarriers=16
//! MaxMembersPerBarrier=32
//! ```
//!
//! # Usage Examples
//! ```no_run
//! use schedbarrier::config::Config;
//!
//! let mut config = Config::default();
//! config.set_logging_enabled(true);
//! ```

#![allow(clippy::too_many_arguments)]

use std::str::FromStr;
use std::time::Duration;

use crate::def::{
    BARRIER_SECTION, LOG_CAPACITY, MAX_BARRIERS, MAX_MEMBERS_PER_BARRIER,
    SLEEP_CALLBACK_INTERVAL_MS,
};
use crate::error::{BarrierError, Result};
use crate::ini::IniStore;

const KEY_LOGGING: &str = "BarrierLogging";
const KEY_LOG_SIZE: &str = "BarrierLogSize";
const KEY_MAX_BARRIERS: &str = "MaxBarriers";
const KEY_MAX_MEMBERS: &str = "MaxMembersPerBarrier";

/// Configuration for the barrier subsystem.
///
/// # Capacity
/// - `max_barriers`: number of registry slots; `AddBarrier` fails with
///   `RegistryFull` beyond it
/// - `max_members_per_barrier`: entries per barrier; `Connect` fails with
///   `MemberTableFull` beyond it
///
/// # Diagnostics
/// - `logging_enabled`: whether transitions are recorded in the diagnostic log
/// - `log_capacity`: ring buffer size, oldest entries are overwritten
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of barrier slots in the registry
    pub max_barriers: usize,
    /// Number of member entries per barrier
    pub max_members_per_barrier: usize,
    /// Capacity of the diagnostic log ring buffer
    pub log_capacity: usize,
    /// Whether the diagnostic log records transitions
    pub logging_enabled: bool,
    /// How often a sleeping scheduler runs its bookkeeping callback
    pub sleep_callback_interval: Duration,
}

impl Default for Config {
    /// Creates a new Config instance with default values.
    ///
    /// # Default Values
    /// - `max_barriers`: 8
    /// - `max_members_per_barrier`: 64
    /// - `log_capacity`: 512
    /// - `logging_enabled`: false
    /// - `sleep_callback_interval`: 10ms
    fn default() -> Self {
        Self {
            max_barriers: MAX_BARRIERS,
            max_members_per_barrier: MAX_MEMBERS_PER_BARRIER,
            log_capacity: LOG_CAPACITY,
            logging_enabled: false,
            sleep_callback_interval: Duration::from_millis(SLEEP_CALLBACK_INTERVAL_MS),
        }
    }
}

impl Config {
    pub fn new(
        max_barriers: usize,
        max_members_per_barrier: usize,
        log_capacity: usize,
        logging_enabled: bool,
        sleep_callback_interval: Duration,
    ) -> Self {
        Self {
            max_barriers,
            max_members_per_barrier,
            log_capacity,
            logging_enabled,
            sleep_callback_interval,
        }
    }

    /// Reads overrides from the `[SchedulerBarriers]` section, falling back
    /// to the defaults for missing keys.
    pub fn from_store(store: &IniStore) -> Result<Self> {
        let mut config = Config::default();
        if let Some(v) = store.get(BARRIER_SECTION, KEY_LOGGING) {
            config.logging_enabled = parse_yes_no(KEY_LOGGING, v)?;
        }
        if let Some(v) = store.get(BARRIER_SECTION, KEY_LOG_SIZE) {
            config.log_capacity = parse_positive(KEY_LOG_SIZE, v)?;
        }
        if let Some(v) = store.get(BARRIER_SECTION, KEY_MAX_BARRIERS) {
            config.max_barriers = parse_positive(KEY_MAX_BARRIERS, v)?;
        }
        if let Some(v) = store.get(BARRIER_SECTION, KEY_MAX_MEMBERS) {
            config.max_members_per_barrier = parse_positive(KEY_MAX_MEMBERS, v)?;
        }
        Ok(config)
    }

    pub fn set_logging_enabled(&mut self, enabled: bool) {
        self.logging_enabled = enabled;
    }
}

fn parse_yes_no(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        _ => Err(BarrierError::InvalidConfig(format!(
            "{} expects Yes or No, got '{}'",
            key, value
        ))),
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match usize::from_str(value) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(BarrierError::InvalidConfig(format!(
            "{} expects a positive integer, got '{}'",
            key, value
        ))),
    }
}
