use thiserror::Error;

use rpe_core::{LinkId, ProgramId, UsageId};

use crate::link::LinkStatus;
use crate::program::ProgramStatus;
use crate::usage::UsageStatus;

/// Rejected lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("program {program}: invalid transition from {from} to {to}")]
    ProgramTransition {
        program: ProgramId,
        from: ProgramStatus,
        to: ProgramStatus,
    },

    #[error("link {link}: invalid transition from {from} to {to}")]
    LinkTransition {
        link: LinkId,
        from: LinkStatus,
        to: LinkStatus,
    },

    #[error("usage {usage} is in terminal state {state}")]
    UsageTerminal { usage: UsageId, state: UsageStatus },

    /// The program requires a pathway but none is attached.
    #[error("program {program} requires a pathway but has none")]
    PathwayMissing { program: ProgramId },
}
