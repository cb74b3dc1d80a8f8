//! # Program Lifecycle
//!
//! A program carries the referral configuration (caps, window, rewards,
//! gates, optional pathway) and a lifecycle status. Running counters
//! (completions, reward cumulative) are owned by the claim ledger, not
//! stored here.
//!
//! ```text
//!   Active ──► LimitReached ──► Active (cap raised)
//!     │  ▲
//!     │  └──── UnCompletable (pathway repaired)
//!     ├──────► UnCompletable
//!     ├──────► Inactive ──► Active
//!     └──────► Expired
//!   any non-terminal ──► Deleted
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rpe_core::{ProgramId, Timestamp};
use rpe_pathway::PathwayModel;

use crate::error::StateError;

/// Upper bound for either per-completion reward.
pub const MAX_REWARD_PER_COMPLETION: u64 = 2_000;
/// Upper bound for a program's reward pool.
pub const MAX_REWARD_POOL: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramStatus {
    Active,
    Inactive,
    Expired,
    LimitReached,
    UnCompletable,
    Deleted,
}

impl ProgramStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Expired => "EXPIRED",
            Self::LimitReached => "LIMIT_REACHED",
            Self::UnCompletable => "UNCOMPLETABLE",
            Self::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Whether `self → to` is in the transition table.
    pub fn can_transition_to(&self, to: ProgramStatus) -> bool {
        use ProgramStatus::*;
        match (self, to) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Active, Inactive | Expired | LimitReached | UnCompletable) => true,
            (Inactive, Active | Expired) => true,
            (UnCompletable, Active | Expired | LimitReached | Inactive) => true,
            (LimitReached, Active | Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration rule violated at admin-edit time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid program {field}: {reason}")]
pub struct ProgramValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ProgramValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    status: ProgramStatus,
    pub is_default: bool,
    pub date_start: Timestamp,
    pub date_end: Option<Timestamp>,
    /// Days a referee has to complete after claiming. `None` = no window.
    pub completion_window_in_days: Option<u32>,
    /// Completions across all links. `None` = unlimited.
    pub completion_limit: Option<u32>,
    /// Completions per link. `None` = unlimited.
    pub completion_limit_referee: Option<u32>,
    pub reward_referrer: Option<u64>,
    pub reward_referee: Option<u64>,
    /// Total reward budget. `None` = unlimited.
    pub reward_pool: Option<u64>,
    pub proof_of_personhood_required: bool,
    pub pathway_required: bool,
    pub multiple_links_allowed: bool,
    pub pathway: Option<PathwayModel>,
    pub date_modified: Timestamp,
}

impl Program {
    /// An active program with no caps, window, rewards or gates.
    pub fn new(name: impl Into<String>, date_start: Timestamp) -> Self {
        Self {
            id: ProgramId::new(),
            name: name.into(),
            status: ProgramStatus::Active,
            is_default: false,
            date_start,
            date_end: None,
            completion_window_in_days: None,
            completion_limit: None,
            completion_limit_referee: None,
            reward_referrer: None,
            reward_referee: None,
            reward_pool: None,
            proof_of_personhood_required: false,
            pathway_required: false,
            multiple_links_allowed: false,
            pathway: None,
            date_modified: date_start,
        }
    }

    pub fn with_completion_limit(mut self, limit: u32) -> Self {
        self.completion_limit = Some(limit);
        self
    }

    pub fn with_link_completion_limit(mut self, limit: u32) -> Self {
        self.completion_limit_referee = Some(limit);
        self
    }

    pub fn with_completion_window_days(mut self, days: u32) -> Self {
        self.completion_window_in_days = Some(days);
        self
    }

    pub fn with_rewards(mut self, referrer: u64, referee: u64) -> Self {
        self.reward_referrer = Some(referrer);
        self.reward_referee = Some(referee);
        self
    }

    pub fn with_reward_pool(mut self, pool: u64) -> Self {
        self.reward_pool = Some(pool);
        self
    }

    pub fn with_date_end(mut self, date_end: Timestamp) -> Self {
        self.date_end = Some(date_end);
        self
    }

    pub fn with_pathway(mut self, pathway: PathwayModel) -> Self {
        self.pathway = Some(pathway);
        self.pathway_required = true;
        self
    }

    pub fn requiring_proof_of_personhood(mut self) -> Self {
        self.proof_of_personhood_required = true;
        self
    }

    pub fn allowing_multiple_links(mut self) -> Self {
        self.multiple_links_allowed = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn status(&self) -> ProgramStatus {
        self.status
    }

    pub fn transition(&mut self, to: ProgramStatus, now: Timestamp) -> Result<(), StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError::ProgramTransition {
                program: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.date_modified = now;
        Ok(())
    }

    pub fn is_started(&self, now: Timestamp) -> bool {
        self.date_start <= now
    }

    /// Strictly after `date_end`. At `date_end` itself the program is live
    /// for intake, evaluation and the expiration job alike.
    pub fn is_past_end(&self, now: Timestamp) -> bool {
        self.date_end.is_some_and(|end| now > end)
    }

    /// Referrer plus referee reward per completion, `None` amounts as zero.
    pub fn reward_per_completion(&self) -> u64 {
        self.reward_referrer.unwrap_or(0) + self.reward_referee.unwrap_or(0)
    }

    /// Latest instant a usage claimed at `claimed` may complete:
    /// `min(claimed + window, date_end)`. `None` when neither bound is set.
    pub fn usage_expires_at(&self, claimed: Timestamp) -> Option<Timestamp> {
        let window = self
            .completion_window_in_days
            .map(|days| claimed.add(Duration::days(i64::from(days))));
        match (window, self.date_end) {
            (Some(w), Some(e)) => Some(w.min(e)),
            (w, e) => w.or(e),
        }
    }

    /// Admin-time configuration checks.
    pub fn validate(&self) -> Result<(), ProgramValidationError> {
        type E = ProgramValidationError;

        if self.name.trim().is_empty() || self.name.chars().count() > 150 {
            return Err(E::new("name", "must be 1 to 150 characters"));
        }
        if self.completion_window_in_days == Some(0) {
            return Err(E::new("completion_window_in_days", "must be greater than 0"));
        }
        if self.completion_limit_referee == Some(0) {
            return Err(E::new("completion_limit_referee", "must be greater than 0"));
        }
        if self.completion_limit == Some(0) {
            return Err(E::new("completion_limit", "must be greater than 0"));
        }
        for (field, reward) in [
            ("reward_referrer", self.reward_referrer),
            ("reward_referee", self.reward_referee),
        ] {
            match reward {
                Some(0) => return Err(E::new(field, "must be greater than 0")),
                Some(r) if r > MAX_REWARD_PER_COMPLETION => {
                    return Err(E::new(
                        field,
                        format!("may not exceed {MAX_REWARD_PER_COMPLETION}"),
                    ))
                }
                _ => {}
            }
        }
        if let Some(pool) = self.reward_pool {
            if pool == 0 {
                return Err(E::new("reward_pool", "must be greater than 0"));
            }
            if pool < self.reward_per_completion() {
                return Err(E::new(
                    "reward_pool",
                    "must be at least the referrer plus referee reward",
                ));
            }
            if pool > MAX_REWARD_POOL {
                return Err(E::new(
                    "reward_pool",
                    format!("may not exceed {MAX_REWARD_POOL}"),
                ));
            }
        }

        let has_gate = self.proof_of_personhood_required || self.pathway_required;
        if self.reward_per_completion() > 0 {
            if self.completion_limit.is_none() && self.completion_limit_referee.is_none() {
                return Err(E::new(
                    "completion_limit",
                    "rewards require a per-link or program-wide completion cap",
                ));
            }
            if !has_gate {
                return Err(E::new(
                    "proof_of_personhood_required",
                    "rewards require proof of personhood or a pathway",
                ));
            }
        }
        if self.is_default && !has_gate {
            return Err(E::new(
                "is_default",
                "default programs require proof of personhood or a pathway",
            ));
        }
        if self.multiple_links_allowed && !has_gate && self.completion_limit_referee.is_none() {
            return Err(E::new(
                "multiple_links_allowed",
                "multiple links require proof of personhood, a per-link cap or a pathway",
            ));
        }
        if let Some(end) = self.date_end {
            if end < self.date_start {
                return Err(E::new("date_end", "cannot be earlier than date_start"));
            }
        }
        match (self.pathway_required, self.pathway.is_some()) {
            (true, false) => Err(E::new("pathway", "required by this program but missing")),
            (false, true) => Err(E::new("pathway", "present but not required")),
            _ => Ok(()),
        }
    }
}
