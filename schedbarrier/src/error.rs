use crate::member::{Member, SyncPhase};

#[derive(thiserror::Error, Debug)]
pub enum BarrierError {
    #[error("BarrierError: name '{0}' exceeds {max} bytes", max = crate::def::MAX_BARRIER_NAME_LEN)]
    NameTooLong(String),

    #[error("BarrierError: barrier '{0}' already exists")]
    DuplicateName(String),

    #[error("BarrierError: registry is full ({0} barriers)")]
    RegistryFull(usize),

    #[error("BarrierError: unknown barrier '{0}'")]
    UnknownBarrier(String),

    #[error("BarrierError: member table of '{name}' is full ({capacity} entries)")]
    MemberTableFull { name: String, capacity: usize },

    #[error("BarrierError: barrier '{name}' still has {members} members")]
    NotEmpty { name: String, members: usize },

    #[error("BarrierError: {member} is not associated with barrier '{name}'")]
    NotAssociated { member: String, name: String },

    #[error("BarrierError: {member} is already associated with barrier '{name}' for phase {phase}")]
    AlreadyAssociated {
        member: String,
        name: String,
        phase: SyncPhase,
    },

    #[error("BarrierError: phase {phase} is not available to {member}")]
    InvalidPhase { member: Member, phase: SyncPhase },

    #[error("MemberError: no free {0} slot left")]
    MemberSlotsExhausted(&'static str),

    #[error("MemberError: unknown member '{0}'")]
    UnknownMember(String),

    #[error("ConfigError: {0}")]
    InvalidConfig(String),

    #[error("ConfigError: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BarrierError>;
