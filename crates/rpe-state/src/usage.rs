//! # Link Usage State Machine
//!
//! One usage per referee claim of a referral link.
//!
//! ```text
//!   Pending ──► Completed   (pathway satisfied, personhood satisfied,
//!      │                     completion slot reserved)
//!      └──────► Expired     (window elapsed, program ended, or cascade)
//! ```
//!
//! Both outcomes are terminal. Expiry is checked before eligibility, so a
//! claim past its window can never complete even if its facts caught up.
//! Rewards are fixed on the usage at completion and never re-derived.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use rpe_core::{LinkId, ProgramId, Timestamp, UsageId, UserId};
use rpe_pathway::{PathwayProgress, PathwayVersion};

use crate::error::StateError;
use crate::link::LinkStatus;
use crate::program::{Program, ProgramStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageStatus {
    Pending,
    Completed,
    Expired,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

impl std::fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a referee proved they are a real person. Either method satisfies
/// the requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofOfPersonhoodMethod {
    Otp,
    SocialLogin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// `now - date_claimed` exceeded the program's completion window.
    CompletionWindowElapsed,
    /// The program's `date_end` passed while the usage was pending.
    ProgramEnded,
    /// The program was expired and its pending usages cascaded.
    ProgramExpired,
    /// The link was expired and its pending usages cascaded.
    LinkExpired,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompletionWindowElapsed => "COMPLETION_WINDOW_ELAPSED",
            Self::ProgramEnded => "PROGRAM_ENDED",
            Self::ProgramExpired => "PROGRAM_EXPIRED",
            Self::LinkExpired => "LINK_EXPIRED",
        }
    }
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an evaluated usage is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingReason {
    PathwayIncomplete { percent_complete: u8 },
    ProofOfPersonhoodMissing,
    /// A program-wide or per-link completion cap is already reached.
    CapacityExceeded,
    ReferrerBlocked,
    ProgramNotActive { status: ProgramStatus },
    LinkNotActive { status: LinkStatus },
}

impl PendingReason {
    /// Stable code for logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathwayIncomplete { .. } => "pathway_incomplete",
            Self::ProofOfPersonhoodMissing => "proof_of_personhood_missing",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::ReferrerBlocked => "referrer_blocked",
            Self::ProgramNotActive { .. } => "program_not_active",
            Self::LinkNotActive { .. } => "link_not_active",
        }
    }
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathwayIncomplete { percent_complete } => {
                write!(f, "pathway incomplete ({percent_complete}%)")
            }
            Self::ProofOfPersonhoodMissing => f.write_str("proof of personhood not completed"),
            Self::CapacityExceeded => f.write_str("completion capacity exceeded"),
            Self::ReferrerBlocked => f.write_str("referrer is blocked"),
            Self::ProgramNotActive { status } => write!(f, "program is {status}"),
            Self::LinkNotActive { status } => write!(f, "link is {status}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(PendingReason),
}

/// Rewards fixed on a usage at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardAmounts {
    pub referrer: u64,
    pub referee: u64,
}

impl RewardAmounts {
    pub fn total(&self) -> u64 {
        self.referrer + self.referee
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_state: UsageStatus,
    pub to_state: UsageStatus,
    pub timestamp: Timestamp,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralLinkUsage {
    pub id: UsageId,
    pub program_id: ProgramId,
    pub link_id: LinkId,
    pub referrer_id: UserId,
    pub referee_id: UserId,
    /// Pathway version the referee claimed against. Evaluation always uses
    /// this version.
    pub pathway_version: Option<PathwayVersion>,
    pub date_claimed: Timestamp,
    status: UsageStatus,
    date_completed: Option<Timestamp>,
    date_expired: Option<Timestamp>,
    expiry_reason: Option<ExpiryReason>,
    proof_of_personhood: Option<ProofOfPersonhoodMethod>,
    progress: Option<PathwayProgress>,
    pending_reason: Option<PendingReason>,
    rewards: Option<RewardAmounts>,
    reward_settlement_failed: bool,
    needs_evaluation: bool,
    last_evaluated: Option<Timestamp>,
    transition_log: Vec<TransitionRecord>,
}

impl ReferralLinkUsage {
    pub fn new(
        program_id: ProgramId,
        link_id: LinkId,
        referrer_id: UserId,
        referee_id: UserId,
        pathway_version: Option<PathwayVersion>,
        date_claimed: Timestamp,
    ) -> Self {
        Self {
            id: UsageId::new(),
            program_id,
            link_id,
            referrer_id,
            referee_id,
            pathway_version,
            date_claimed,
            status: UsageStatus::Pending,
            date_completed: None,
            date_expired: None,
            expiry_reason: None,
            proof_of_personhood: None,
            progress: None,
            pending_reason: None,
            rewards: None,
            reward_settlement_failed: false,
            needs_evaluation: true,
            last_evaluated: None,
            transition_log: Vec::new(),
        }
    }

    pub fn status(&self) -> UsageStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn date_completed(&self) -> Option<Timestamp> {
        self.date_completed
    }

    pub fn date_expired(&self) -> Option<Timestamp> {
        self.date_expired
    }

    pub fn expiry_reason(&self) -> Option<ExpiryReason> {
        self.expiry_reason
    }

    pub fn proof_of_personhood(&self) -> Option<ProofOfPersonhoodMethod> {
        self.proof_of_personhood
    }

    /// Latest progress snapshot. Informational only; eligibility is always
    /// decided on a fresh evaluation.
    pub fn progress(&self) -> Option<&PathwayProgress> {
        self.progress.as_ref()
    }

    pub fn pending_reason(&self) -> Option<PendingReason> {
        self.pending_reason
    }

    pub fn rewards(&self) -> Option<RewardAmounts> {
        self.rewards
    }

    pub fn reward_settlement_failed(&self) -> bool {
        self.reward_settlement_failed
    }

    pub fn needs_evaluation(&self) -> bool {
        self.needs_evaluation
    }

    pub fn last_evaluated(&self) -> Option<Timestamp> {
        self.last_evaluated
    }

    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.transition_log
    }

    fn require_pending(&self) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::UsageTerminal {
                usage: self.id,
                state: self.status,
            });
        }
        Ok(())
    }

    pub fn record_proof_of_personhood(
        &mut self,
        method: ProofOfPersonhoodMethod,
    ) -> Result<(), StateError> {
        self.require_pending()?;
        self.proof_of_personhood = Some(method);
        self.needs_evaluation = true;
        Ok(())
    }

    /// Flag a pending usage for re-evaluation. Returns whether the flag was set.
    pub fn mark_for_evaluation(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.needs_evaluation = true;
        true
    }

    /// Store the outcome of an evaluation that left the usage pending.
    pub fn record_evaluation(
        &mut self,
        now: Timestamp,
        progress: Option<PathwayProgress>,
        pending_reason: Option<PendingReason>,
    ) -> Result<(), StateError> {
        self.require_pending()?;
        if progress.is_some() {
            self.progress = progress;
        }
        self.pending_reason = pending_reason;
        self.needs_evaluation = false;
        self.last_evaluated = Some(now);
        Ok(())
    }

    /// Why this pending usage must expire at `now`, if it must.
    ///
    /// The window check is strict: a usage claimed exactly
    /// `completion_window_in_days` ago is still live.
    pub fn expiry_due(&self, program: &Program, now: Timestamp) -> Option<ExpiryReason> {
        if self.is_terminal() {
            return None;
        }
        if let Some(days) = program.completion_window_in_days {
            if now.duration_since(&self.date_claimed) > Duration::days(i64::from(days)) {
                return Some(ExpiryReason::CompletionWindowElapsed);
            }
        }
        if program.is_past_end(now) {
            return Some(ExpiryReason::ProgramEnded);
        }
        None
    }

    /// Whole days left before expiry, rounded up. `None` when the usage is
    /// settled or has no expiry bound.
    pub fn time_remaining_in_days(&self, program: &Program, now: Timestamp) -> Option<u32> {
        if self.is_terminal() {
            return None;
        }
        let expires_at = program.usage_expires_at(self.date_claimed)?;
        let secs = expires_at.duration_since(&now).num_seconds();
        if secs <= 0 {
            return Some(0);
        }
        let days = (secs + 86_399) / 86_400;
        Some(u32::try_from(days).unwrap_or(u32::MAX))
    }

    pub fn proof_of_personhood_satisfied(&self, program: &Program) -> bool {
        !program.proof_of_personhood_required || self.proof_of_personhood.is_some()
    }

    /// Whether the gates allow completion. Capacity, abuse and link status
    /// are checked by the caller.
    ///
    /// The pathway gate follows the version pinned at claim time, not the
    /// program's current pathway: a usage claimed without a pathway never
    /// needs one.
    pub fn completion_eligibility(
        &self,
        program: &Program,
        progress: Option<&PathwayProgress>,
    ) -> Result<Eligibility, StateError> {
        self.require_pending()?;
        if self.pathway_version.is_some() {
            let progress = progress.ok_or(StateError::PathwayMissing {
                program: program.id,
            })?;
            if !progress.completed {
                return Ok(Eligibility::Ineligible(PendingReason::PathwayIncomplete {
                    percent_complete: progress.percent_complete,
                }));
            }
        }
        if !self.proof_of_personhood_satisfied(program) {
            return Ok(Eligibility::Ineligible(
                PendingReason::ProofOfPersonhoodMissing,
            ));
        }
        Ok(Eligibility::Eligible)
    }

    /// Overall completion percentage. Without a pinned pathway, personhood
    /// is the whole score. With one, personhood is worth 50 and the pathway the
    /// other 50.
    pub fn percent_complete(&self, program: &Program) -> u8 {
        if self.status == UsageStatus::Completed {
            return 100;
        }
        let personhood = self.proof_of_personhood_satisfied(program);
        if self.pathway_version.is_none() {
            return if personhood { 100 } else { 0 };
        }
        let pathway = self.progress.as_ref().map_or(0, |p| p.percent_complete);
        (if personhood { 50 } else { 0 }) + pathway / 2
    }

    pub fn complete(
        &mut self,
        now: Timestamp,
        rewards: RewardAmounts,
        reward_settlement_failed: bool,
    ) -> Result<(), StateError> {
        self.require_pending()?;
        self.push_transition(UsageStatus::Completed, now, None);
        self.date_completed = Some(now);
        self.rewards = Some(rewards);
        self.reward_settlement_failed = reward_settlement_failed;
        self.pending_reason = None;
        self.needs_evaluation = false;
        self.last_evaluated = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: Timestamp, reason: ExpiryReason) -> Result<(), StateError> {
        self.require_pending()?;
        self.push_transition(UsageStatus::Expired, now, Some(reason.as_str().to_string()));
        self.date_expired = Some(now);
        self.expiry_reason = Some(reason);
        self.pending_reason = None;
        self.needs_evaluation = false;
        self.last_evaluated = Some(now);
        Ok(())
    }

    fn push_transition(&mut self, to: UsageStatus, now: Timestamp, reason: Option<String>) {
        self.transition_log.push(TransitionRecord {
            from_state: self.status,
            to_state: to,
            timestamp: now,
            reason,
        });
        self.status = to;
    }
}
