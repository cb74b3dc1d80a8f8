//! # Claim Intake
//!
//! Link creation and referee claims. Both run under the engine's intake
//! mutex so the one-link-per-referrer and one-usage-per-referee rules hold
//! under concurrent requests. A claim that passes every rule creates a
//! Pending usage and evaluates it immediately.

use serde::{Deserialize, Serialize};

use rpe_core::{LinkId, ProgramId, Timestamp, UsageId, UserId};
use rpe_state::{
    LinkStatus, ProgramStatus, ProofOfPersonhoodMethod, ReferralLink, ReferralLinkUsage,
};

use crate::engine::ReferralEngine;
use crate::error::{ClaimRejection, EngineError, LinkRejection};
use crate::events::EngineEvent;
use crate::pipeline::EvaluationOutcome;

const MAX_LINK_NAME_LEN: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub link_id: LinkId,
    pub referee_id: UserId,
    /// When the referee finished onboarding. `None` if they have not.
    pub referee_onboarded_at: Option<Timestamp>,
}

impl ReferralEngine {
    /// Create an Active link owned by `referrer` in `program_id`.
    pub fn create_link(
        &self,
        program_id: ProgramId,
        referrer: UserId,
        name: &str,
    ) -> Result<ReferralLink, EngineError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_LINK_NAME_LEN {
            return Err(LinkRejection::InvalidName.into());
        }

        let _intake = self.intake.lock();
        let now = self.now();
        let program = self.require_program(program_id)?;

        if program.status() != ProgramStatus::Active {
            return Err(LinkRejection::ProgramNotActive {
                status: program.status(),
            }
            .into());
        }
        if !program.is_started(now) {
            return Err(LinkRejection::ProgramNotStarted.into());
        }
        if program.is_past_end(now) {
            return Err(LinkRejection::ProgramEnded.into());
        }
        if program.completion_limit.is_some()
            && self
                .ledger
                .program_totals(&program)
                .completion_balance
                .unwrap_or(0)
                == 0
        {
            return Err(LinkRejection::CapacityExceeded.into());
        }
        if self.abuse_gate().is_blocked(referrer) {
            return Err(LinkRejection::ReferrerBlocked.into());
        }

        let owned = self
            .links
            .filter(|l| l.program_id == program_id && l.user_id == referrer);
        if !program.multiple_links_allowed {
            if let Some(existing) = owned.iter().find(|l| l.status() == LinkStatus::Active) {
                return Err(LinkRejection::MultipleLinksNotAllowed {
                    program: program_id,
                    existing: existing.id,
                }
                .into());
            }
        }
        if owned.iter().any(|l| l.name.eq_ignore_ascii_case(name)) {
            return Err(LinkRejection::DuplicateName {
                name: name.to_string(),
            }
            .into());
        }

        let link = ReferralLink::new(program_id, referrer, name, now);
        tracing::info!(link_id = %link.id, program_id = %program_id, referrer_id = %referrer, "link created");
        self.links.insert(link.id, link.clone());
        Ok(link)
    }

    /// Claim a link as referee.
    ///
    /// On success the returned usage has already been evaluated once, so
    /// it may be Completed when the program has no outstanding gates.
    pub fn claim(&self, request: &ClaimRequest) -> Result<ReferralLinkUsage, EngineError> {
        let usage = {
            let _intake = self.intake.lock();
            match self.admit(request) {
                Ok(usage) => usage,
                Err(EngineError::ClaimRejected(rejection)) => {
                    metrics::counter!("rpe_claim_rejected_total", "reason" => rejection.code())
                        .increment(1);
                    tracing::info!(
                        link_id = %request.link_id,
                        referee_id = %request.referee_id,
                        reason = rejection.code(),
                        "claim rejected"
                    );
                    return Err(rejection.into());
                }
                Err(err) => return Err(err),
            }
        };

        tracing::info!(
            usage_id = %usage.id,
            program_id = %usage.program_id,
            link_id = %usage.link_id,
            referee_id = %usage.referee_id,
            "usage claimed"
        );
        self.emit(EngineEvent::UsageClaimed {
            usage_id: usage.id,
            program_id: usage.program_id,
            link_id: usage.link_id,
            referee_id: usage.referee_id,
            at: usage.date_claimed,
        });

        // The usage stays dirty if this fails; the sweeper retries it.
        if let Err(err) = self.evaluate_usage(usage.id) {
            tracing::warn!(usage_id = %usage.id, error = %err, "initial evaluation failed");
        }
        self.usages
            .get(&usage.id)
            .ok_or_else(|| EngineError::not_found("usage", usage.id))
    }

    /// Record that the referee proved personhood, then re-evaluate.
    pub fn record_proof_of_personhood(
        &self,
        usage_id: UsageId,
        method: ProofOfPersonhoodMethod,
    ) -> Result<EvaluationOutcome, EngineError> {
        self.locks
            .with_lock(usage_id, self.config.lock_timeout(), || {
                self.usages
                    .try_update(&usage_id, |usage| usage.record_proof_of_personhood(method))
                    .ok_or_else(|| EngineError::not_found("usage", usage_id))?
                    .map_err(EngineError::from)
            })?;
        tracing::debug!(usage_id = %usage_id, method = ?method, "proof of personhood recorded");
        self.evaluate_usage(usage_id)
    }

    fn admit(&self, request: &ClaimRequest) -> Result<ReferralLinkUsage, EngineError> {
        let now = self.now();
        let link = self
            .links
            .get(&request.link_id)
            .ok_or_else(|| EngineError::not_found("link", request.link_id))?;
        let program = self.require_program(link.program_id)?;

        if link.user_id == request.referee_id {
            return Err(ClaimRejection::SelfReferral.into());
        }

        let onboarded_at = request
            .referee_onboarded_at
            .ok_or(ClaimRejection::RefereeNotOnboarded)?;
        let window_mins = self.config.claim_onboarding_window_mins;
        if now.duration_since(&onboarded_at) > chrono::Duration::minutes(i64::from(window_mins)) {
            return Err(ClaimRejection::OnboardingWindowElapsed { window_mins }.into());
        }

        let claimed = self.usages.filter(|u| u.referee_id == request.referee_id);
        if claimed.iter().any(|u| u.program_id != program.id) {
            return Err(ClaimRejection::ParticipatedInOtherProgram.into());
        }
        if let Some(existing) = claimed.first() {
            if existing.link_id != link.id {
                return Err(EngineError::DataInconsistency(format!(
                    "referee {} already has usage {} for program {} on a different link {}",
                    request.referee_id, existing.id, program.id, existing.link_id
                )));
            }
            return Err(ClaimRejection::AlreadyClaimed {
                usage: existing.id,
                status: existing.status(),
            }
            .into());
        }

        if program.status() != ProgramStatus::Active {
            return Err(ClaimRejection::ProgramNotActive {
                status: program.status(),
            }
            .into());
        }
        if !program.is_started(now) {
            return Err(ClaimRejection::ProgramNotStarted.into());
        }
        if program.is_past_end(now) {
            return Err(ClaimRejection::ProgramEnded.into());
        }
        if !self.ledger.has_completion_capacity(&program, link.id) {
            return Err(ClaimRejection::CapacityExceeded.into());
        }
        if link.status() != LinkStatus::Active {
            return Err(ClaimRejection::LinkNotActive {
                status: link.status(),
            }
            .into());
        }
        if self.abuse_gate().is_blocked(link.user_id) {
            return Err(ClaimRejection::ReferrerBlocked.into());
        }

        let usage = ReferralLinkUsage::new(
            program.id,
            link.id,
            link.user_id,
            request.referee_id,
            program.pathway.as_ref().map(|p| p.version()),
            now,
        );
        self.usages.insert(usage.id, usage.clone());
        Ok(usage)
    }
}
