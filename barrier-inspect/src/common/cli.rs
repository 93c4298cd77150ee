use clap::{Parser, Subcommand};
use schedbarrier::member::{MemberKind, SyncPhase, WaitMode};
use serde::Serialize;

#[derive(Subcommand, Debug, Serialize, Clone)]
pub enum Command {
    /// Show barrier definitions and every member's associations
    List,
    AddBarrier {
        name: String,

        /// A lone member must wait even when its own mask is satisfied
        #[arg(long)]
        wait_if_alone: bool,
    },
    RemoveBarrier {
        name: String,
    },
    Associate {
        /// "process" or "scheduler"
        #[arg(long)]
        kind: MemberKind,

        #[arg(long)]
        member: String,

        #[arg(long)]
        barrier: String,

        /// before, behind, loop-out-before or loop-out-behind
        #[arg(long, default_value = "before")]
        phase: SyncPhase,

        /// "signal" (signal only) or "wait" (signal and wait)
        #[arg(long, default_value = "wait")]
        mode: WaitMode,
    },
    Dissociate {
        #[arg(long)]
        kind: MemberKind,

        #[arg(long)]
        member: String,

        #[arg(long)]
        barrier: String,

        #[arg(long, default_value = "before")]
        phase: SyncPhase,
    },
    /// Run every configured scheduler on its own thread for a number of cycles
    Simulate {
        #[arg(long, default_value_t = 10)]
        cycles: u64,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Number of diagnostic log entries to print
        #[arg(long, default_value_t = 20)]
        recent: usize,
    },
}

#[derive(Parser, Debug, Serialize, Clone)]
pub struct InspectCli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file holding the [SchedulerBarriers] section
    #[arg(long, default_value = "barriers.ini")]
    pub config: String,

    /// Default filter for env_logger when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
