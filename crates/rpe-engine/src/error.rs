//! # Engine Errors
//!
//! Claim rejections and pending reasons are typed outcomes, not failures of
//! the engine. [`EngineError`] carries both the rejections an operation
//! returns to its caller and the fatal conditions (unknown records, a
//! required pathway that is missing, corrupt fact data) that abort it.

use thiserror::Error;

use rpe_core::{LinkId, ProgramId, UsageId};
use rpe_pathway::{EvaluationError, ValidationError};
use rpe_state::{LinkStatus, ProgramStatus, ProgramValidationError, StateError, UsageStatus};

/// Why a claim was refused at intake. No usage is created.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
    #[error("a referrer cannot claim their own link")]
    SelfReferral,

    #[error("referee has not completed onboarding")]
    RefereeNotOnboarded,

    #[error("claim window of {window_mins} minutes after onboarding has elapsed")]
    OnboardingWindowElapsed { window_mins: u32 },

    #[error("referee already participated in another program")]
    ParticipatedInOtherProgram,

    #[error("referee already claimed this program (usage {usage}, {status})")]
    AlreadyClaimed { usage: UsageId, status: UsageStatus },

    #[error("program is {status}")]
    ProgramNotActive { status: ProgramStatus },

    #[error("program has not started")]
    ProgramNotStarted,

    #[error("program has ended")]
    ProgramEnded,

    #[error("completion capacity exceeded")]
    CapacityExceeded,

    #[error("link is {status}")]
    LinkNotActive { status: LinkStatus },

    #[error("referrer is blocked")]
    ReferrerBlocked,
}

impl ClaimRejection {
    /// Stable code for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SelfReferral => "self_referral",
            Self::RefereeNotOnboarded => "referee_not_onboarded",
            Self::OnboardingWindowElapsed { .. } => "onboarding_window_elapsed",
            Self::ParticipatedInOtherProgram => "participated_in_other_program",
            Self::AlreadyClaimed { .. } => "already_claimed",
            Self::ProgramNotActive { .. } => "program_not_active",
            Self::ProgramNotStarted => "program_not_started",
            Self::ProgramEnded => "program_ended",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::LinkNotActive { .. } => "link_not_active",
            Self::ReferrerBlocked => "referrer_blocked",
        }
    }
}

/// Why a referral link could not be created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkRejection {
    #[error("program {program} allows one active link per referrer (existing {existing})")]
    MultipleLinksNotAllowed { program: ProgramId, existing: LinkId },

    #[error("a link named {name:?} already exists")]
    DuplicateName { name: String },

    #[error("link name must be 1 to 150 characters")]
    InvalidName,

    #[error("referrer is blocked")]
    ReferrerBlocked,

    #[error("program is {status}")]
    ProgramNotActive { status: ProgramStatus },

    #[error("program has not started")]
    ProgramNotStarted,

    #[error("program has ended")]
    ProgramEnded,

    #[error("program completion limit reached")]
    CapacityExceeded,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("claim rejected: {0}")]
    ClaimRejected(#[from] ClaimRejection),

    #[error("link rejected: {0}")]
    LinkRejected(#[from] LinkRejection),

    #[error(transparent)]
    ProgramInvalid(#[from] ProgramValidationError),

    #[error("invalid pathway: {0}")]
    Pathway(#[from] ValidationError),

    /// Transient. The caller should retry.
    #[error("usage {usage}: lock not acquired within {waited_ms}ms")]
    LockTimeout { usage: UsageId, waited_ms: u64 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
