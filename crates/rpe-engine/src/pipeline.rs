//! # Usage Evaluation Pipeline
//!
//! One evaluation of one usage, run under that usage's lock:
//!
//! ```text
//!   terminal? ──► no-op
//!   expiry due? ──► Expired            (always wins over completion)
//!   capacity guard ──► Pending(reason)  (block, statuses, caps)
//!   evaluate pinned pathway version
//!   eligibility ──► Pending(reason)     (pathway, personhood)
//!   reserve completion slot ──► Pending(CapacityExceeded)
//!   settle rewards ──► Completed
//!   apply cap flips to link / program
//! ```
//!
//! Evaluating a settled usage changes nothing, so the pipeline can be
//! re-run freely by intake, fact notifications and the sweeper.

use serde::{Deserialize, Serialize};

use rpe_core::{ProgramId, Timestamp, UsageId, UserId};
use rpe_ledger::SlotReservation;
use rpe_pathway::{evaluate, PathwayProgress};
use rpe_state::{
    Eligibility, ExpiryReason, LinkStatus, PendingReason, ProgramStatus, RewardAmounts,
    UsageStatus,
};

use crate::engine::ReferralEngine;
use crate::error::EngineError;
use crate::events::EngineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The usage was already Completed or Expired.
    Unchanged(UsageStatus),
    Completed {
        rewards: RewardAmounts,
        settlement_failed: bool,
    },
    Expired(ExpiryReason),
    Pending(PendingReason),
}

/// What changed for a user whose pending usages should be re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactChangeSource {
    /// Identity actions such as OTP or social login.
    IdentityAction,
    /// The user completed an opportunity.
    OpportunityCompletion,
}

impl ReferralEngine {
    /// Evaluate one usage under its lock.
    pub fn evaluate_usage(&self, usage_id: UsageId) -> Result<EvaluationOutcome, EngineError> {
        self.locks
            .with_lock(usage_id, self.config.lock_timeout(), || {
                self.evaluate_locked(usage_id)
            })
    }

    /// Mark the pending usages where `user` is referee or referrer for
    /// re-evaluation. Returns how many were marked.
    pub fn notify_fact_changed(&self, user: UserId, source: FactChangeSource) -> usize {
        let candidates = self
            .usages
            .filter(|u| !u.is_terminal() && (u.referee_id == user || u.referrer_id == user));
        let marked = candidates
            .iter()
            .filter(|u| {
                self.usages
                    .try_update(&u.id, |usage| Ok::<_, EngineError>(usage.mark_for_evaluation()))
                    .and_then(Result::ok)
                    .unwrap_or(false)
            })
            .count();
        tracing::debug!(user_id = %user, source = ?source, marked, "fact change noted");
        marked
    }

    fn evaluate_locked(&self, usage_id: UsageId) -> Result<EvaluationOutcome, EngineError> {
        let now = self.now();
        let usage = self
            .usages
            .get(&usage_id)
            .ok_or_else(|| EngineError::not_found("usage", usage_id))?;
        if usage.is_terminal() {
            return Ok(EvaluationOutcome::Unchanged(usage.status()));
        }
        let program = self.programs.get(&usage.program_id).ok_or_else(|| {
            EngineError::DataInconsistency(format!(
                "usage {usage_id} references missing program {}",
                usage.program_id
            ))
        })?;

        if let Some(reason) = usage.expiry_due(&program, now) {
            self.expire_usage_locked(usage_id, reason, now)?;
            return Ok(EvaluationOutcome::Expired(reason));
        }

        let link = self.links.get(&usage.link_id).ok_or_else(|| {
            EngineError::DataInconsistency(format!(
                "usage {usage_id} references missing link {}",
                usage.link_id
            ))
        })?;
        if let Err(reason) = self.capacity_guard().check(&program, &link) {
            return self.leave_pending(usage_id, now, None, reason);
        }

        let progress = match usage.pathway_version {
            Some(version) => {
                let model = self.pathways.get(&version).ok_or_else(|| {
                    EngineError::DataInconsistency(format!(
                        "usage {usage_id} pinned to unknown pathway version {version}"
                    ))
                })?;
                Some(evaluate(&model, &self.facts.for_user(usage.referee_id))?)
            }
            None => None,
        };

        if let Eligibility::Ineligible(reason) =
            usage.completion_eligibility(&program, progress.as_ref())?
        {
            return self.leave_pending(usage_id, now, progress, reason);
        }

        let Some(slot) = self.ledger.try_reserve_completion_slot(&program, link.id) else {
            return self.leave_pending(usage_id, now, progress, PendingReason::CapacityExceeded);
        };
        let settled = self.settlement.settle(&self.ledger, &program, &slot);

        self.usages
            .try_update(&usage_id, |usage| {
                if progress.is_some() {
                    usage.record_evaluation(now, progress.clone(), None)?;
                }
                usage.complete(now, settled.paid, settled.settlement_failed)
            })
            .ok_or_else(|| EngineError::not_found("usage", usage_id))??;

        metrics::counter!("rpe_usage_completed_total").increment(1);
        tracing::info!(
            usage_id = %usage_id,
            program_id = %program.id,
            link_id = %link.id,
            referrer_reward = settled.paid.referrer,
            referee_reward = settled.paid.referee,
            "usage completed"
        );
        self.emit(EngineEvent::UsageCompleted {
            usage_id,
            program_id: program.id,
            link_id: link.id,
            rewards: settled.paid,
            at: now,
        });
        if settled.settlement_failed {
            metrics::counter!("rpe_reward_settlement_failed_total").increment(1);
            self.emit(EngineEvent::RewardSettlementFailed {
                usage_id,
                program_id: program.id,
                requested: settled.requested,
                paid: settled.paid,
                at: now,
            });
        }

        self.apply_cap_flips(&slot);

        Ok(EvaluationOutcome::Completed {
            rewards: settled.paid,
            settlement_failed: settled.settlement_failed,
        })
    }

    fn leave_pending(
        &self,
        usage_id: UsageId,
        now: Timestamp,
        progress: Option<PathwayProgress>,
        reason: PendingReason,
    ) -> Result<EvaluationOutcome, EngineError> {
        self.usages
            .try_update(&usage_id, |usage| {
                usage.record_evaluation(now, progress, Some(reason))
            })
            .ok_or_else(|| EngineError::not_found("usage", usage_id))??;
        tracing::debug!(usage_id = %usage_id, reason = reason.code(), "usage remains pending");
        Ok(EvaluationOutcome::Pending(reason))
    }

    /// Expire a usage. The caller holds its lock. Returns false if it was
    /// already settled.
    pub(crate) fn expire_usage_locked(
        &self,
        usage_id: UsageId,
        reason: ExpiryReason,
        now: Timestamp,
    ) -> Result<bool, EngineError> {
        let expired = self
            .usages
            .try_update(&usage_id, |usage| {
                if usage.is_terminal() {
                    return Ok(None);
                }
                usage.expire(now, reason)?;
                Ok::<_, EngineError>(Some(usage.program_id))
            })
            .ok_or_else(|| EngineError::not_found("usage", usage_id))??;
        let Some(program_id) = expired else {
            return Ok(false);
        };
        metrics::counter!("rpe_usage_expired_total").increment(1);
        tracing::info!(usage_id = %usage_id, program_id = %program_id, reason = %reason, "usage expired");
        self.emit(EngineEvent::UsageExpired {
            usage_id,
            program_id,
            reason,
            at: now,
        });
        Ok(true)
    }

    /// A reservation that filled a cap moves the link, or the program and
    /// all of its Active links, to LimitReached.
    fn apply_cap_flips(&self, slot: &SlotReservation) {
        if slot.link_limit_reached() {
            self.transition_link(slot.link_id(), LinkStatus::LimitReached);
        }
        if slot.program_limit_reached() {
            self.program_limit_reached(slot.program_id());
        }
    }

    pub(crate) fn program_limit_reached(&self, program_id: ProgramId) {
        if let Err(err) = self.transition_program(program_id, ProgramStatus::LimitReached) {
            tracing::warn!(program_id = %program_id, error = %err, "program limit flip skipped");
            return;
        }
        let active = self
            .links
            .filter(|l| l.program_id == program_id && l.status() == LinkStatus::Active);
        for link in active {
            self.transition_link(link.id, LinkStatus::LimitReached);
        }
    }
}
