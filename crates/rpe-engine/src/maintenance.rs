//! # Link Maintenance and Blocks
//!
//! Cascades that move many records at once: cancelling a user's or a
//! program's links, expiring a program together with its links and pending
//! usages, and blocking or unblocking a referrer. Each usage touched by a
//! cascade is updated under its own lock; a usage whose lock times out is
//! logged and left for the sweeper.

use rpe_core::{LinkId, ProgramId, UserId};
use rpe_state::{ExpiryReason, LinkStatus, ProgramStatus, ReferralLink, ReferralLinkUsage};

use crate::abuse::{Block, BlockRequest};
use crate::engine::ReferralEngine;
use crate::error::EngineError;
use crate::events::EngineEvent;

impl ReferralEngine {
    /// Cancel one link. Cancelling a cancelled link is a no-op.
    pub fn cancel_link(&self, id: LinkId) -> Result<ReferralLink, EngineError> {
        let link = self
            .links
            .get(&id)
            .ok_or_else(|| EngineError::not_found("link", id))?;
        if link.status() == LinkStatus::Cancelled {
            return Ok(link);
        }
        if !self.transition_link(id, LinkStatus::Cancelled) {
            return Err(rpe_state::StateError::LinkTransition {
                link: id,
                from: link.status(),
                to: LinkStatus::Cancelled,
            }
            .into());
        }
        self.links
            .get(&id)
            .ok_or_else(|| EngineError::not_found("link", id))
    }

    /// Cancel every Active link owned by `user`.
    pub fn cancel_links_by_user(&self, user: UserId) -> Vec<LinkId> {
        self.cancel_active_links(|l| l.user_id == user)
    }

    /// Cancel every Active link of a program.
    pub fn cancel_links_by_program(&self, program: ProgramId) -> Vec<LinkId> {
        self.cancel_active_links(|l| l.program_id == program)
    }

    /// Expire the program's Active and LimitReached links and their
    /// pending usages. Returns the number of links expired.
    pub fn expire_links_by_program(&self, program: ProgramId) -> usize {
        let links = self.links.filter(|l| {
            l.program_id == program
                && matches!(l.status(), LinkStatus::Active | LinkStatus::LimitReached)
        });
        let mut expired = 0;
        for link in links {
            if self.transition_link(link.id, LinkStatus::Expired) {
                expired += 1;
                self.expire_pending_usages(|u| u.link_id == link.id, ExpiryReason::LinkExpired);
            }
        }
        expired
    }

    /// Expire a program, its pending usages and its links.
    pub fn expire_program(&self, id: ProgramId) -> Result<(), EngineError> {
        let program = self.require_program(id)?;
        if program.status() != ProgramStatus::Expired {
            self.transition_program(id, ProgramStatus::Expired)?;
        }
        let usages =
            self.expire_pending_usages(|u| u.program_id == id, ExpiryReason::ProgramExpired);
        let links = self.expire_links_by_program(id);
        tracing::info!(program_id = %id, usages, links, "program expired");
        Ok(())
    }

    /// Block a referrer. Blocking is idempotent: an existing active block
    /// is returned and nothing else happens.
    pub fn block_referrer(&self, request: &BlockRequest) -> Block {
        let now = self.now();
        let (block, created) = self.blocks.block(request, now);
        if !created {
            tracing::debug!(user_id = %request.user_id, block_id = %block.id, "referrer already blocked");
            return block;
        }

        let cancelled = if request.cancel_links {
            self.cancel_links_by_user(request.user_id)
        } else {
            Vec::new()
        };
        // Pending usages credited to this referrer are vetoed on their next pass.
        self.notify_fact_changed(request.user_id, crate::FactChangeSource::IdentityAction);

        tracing::warn!(
            user_id = %request.user_id,
            block_id = %block.id,
            reason = %block.reason,
            links_cancelled = cancelled.len(),
            "referrer blocked"
        );
        self.emit(EngineEvent::ReferrerBlocked {
            user_id: request.user_id,
            links_cancelled: cancelled.len(),
            at: now,
        });
        block
    }

    /// Lift a referrer's active block. Returns `None` when there was none.
    /// Cancelled links stay cancelled.
    pub fn unblock_referrer(&self, user: UserId, comment: Option<String>) -> Option<Block> {
        let now = self.now();
        let block = self.blocks.unblock(user, comment, now)?;
        tracing::info!(user_id = %user, block_id = %block.id, "referrer unblocked");
        self.emit(EngineEvent::ReferrerUnblocked { user_id: user, at: now });
        Some(block)
    }

    fn cancel_active_links(&self, pred: impl Fn(&ReferralLink) -> bool) -> Vec<LinkId> {
        self.links
            .filter(|l| l.status() == LinkStatus::Active && pred(l))
            .into_iter()
            .filter(|l| self.transition_link(l.id, LinkStatus::Cancelled))
            .map(|l| l.id)
            .collect()
    }

    /// Expire matching pending usages, each under its lock. Returns how
    /// many were expired.
    pub(crate) fn expire_pending_usages(
        &self,
        pred: impl Fn(&ReferralLinkUsage) -> bool,
        reason: ExpiryReason,
    ) -> usize {
        let pending = self.usages.filter(|u| !u.is_terminal() && pred(u));
        let mut expired = 0;
        for usage in pending {
            let result = self.locks.with_lock(usage.id, self.config.lock_timeout(), || {
                self.expire_usage_locked(usage.id, reason, self.now())
            });
            match result {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(usage_id = %usage.id, error = %err, "cascade expiry skipped")
                }
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{opportunity, pathway, start, Harness};
    use crate::EvaluationOutcome;
    use rpe_state::{PendingReason, Program, UsageStatus};

    fn gated(h: &Harness) -> ProgramId {
        h.program(
            Program::new("p", start())
                .allowing_multiple_links()
                .with_pathway(pathway(&[opportunity()])),
        )
    }

    #[test]
    fn block_with_cancel_links_vetoes_pending() {
        let h = Harness::new();
        let program = gated(&h);
        let referrer = UserId::new();
        let (a, b) = (h.link(program, referrer), h.link_named(program, referrer, "b"));
        let usage = h.claim(a.id).unwrap();

        let block = h.engine.block_referrer(&BlockRequest {
            user_id: referrer,
            reason: "abuse".to_string(),
            comment: Some("ring".to_string()),
            cancel_links: true,
        });
        assert!(block.active);
        assert_eq!(h.engine.link(a.id).unwrap().status(), LinkStatus::Cancelled);
        assert_eq!(h.engine.link(b.id).unwrap().status(), LinkStatus::Cancelled);
        assert!(h.engine.usage(usage.id).unwrap().needs_evaluation());
        assert!(h.engine.link_blocked(a.id).unwrap());

        assert_eq!(
            h.engine.evaluate_usage(usage.id).unwrap(),
            EvaluationOutcome::Pending(PendingReason::ReferrerBlocked)
        );
        assert!(h.events.events().iter().any(|e| matches!(
            e,
            EngineEvent::ReferrerBlocked { links_cancelled: 2, .. }
        )));
    }

    #[test]
    fn repeated_block_changes_nothing() {
        let h = Harness::new();
        let program = gated(&h);
        let referrer = UserId::new();
        h.link(program, referrer);
        let request = BlockRequest {
            user_id: referrer,
            reason: "abuse".to_string(),
            comment: None,
            cancel_links: false,
        };
        let first = h.engine.block_referrer(&request);
        h.events.take();
        let second = h.engine.block_referrer(&request);
        assert_eq!(first, second);
        assert!(h.events.events().is_empty());
    }

    #[test]
    fn unblock_restores_claims_but_not_links() {
        let h = Harness::new();
        let program = gated(&h);
        let referrer = UserId::new();
        let link = h.link(program, referrer);
        h.engine.block_referrer(&BlockRequest {
            user_id: referrer,
            reason: "abuse".to_string(),
            comment: None,
            cancel_links: false,
        });
        assert!(h.claim(link.id).is_err());

        let lifted = h
            .engine
            .unblock_referrer(referrer, Some("cleared".to_string()))
            .unwrap();
        assert!(!lifted.active);
        assert!(h.claim(link.id).is_ok());
        assert!(h.engine.unblock_referrer(referrer, None).is_none());
    }

    #[test]
    fn program_expiry_cascades() {
        let h = Harness::new();
        let program = gated(&h);
        let link = h.link(program, UserId::new());
        let usage = h.claim(link.id).unwrap();

        h.engine.expire_program(program).unwrap();
        assert_eq!(h.engine.program(program).unwrap().status(), ProgramStatus::Expired);
        assert_eq!(h.engine.link(link.id).unwrap().status(), LinkStatus::Expired);
        let usage = h.engine.usage(usage.id).unwrap();
        assert_eq!(usage.status(), UsageStatus::Expired);
        assert_eq!(usage.expiry_reason(), Some(ExpiryReason::ProgramExpired));

        // Idempotent.
        h.engine.expire_program(program).unwrap();
    }

    #[test]
    fn link_expiry_cascades_with_link_reason() {
        let h = Harness::new();
        let program = gated(&h);
        let link = h.link(program, UserId::new());
        let usage = h.claim(link.id).unwrap();
        assert_eq!(h.engine.expire_links_by_program(program), 1);
        assert_eq!(
            h.engine.usage(usage.id).unwrap().expiry_reason(),
            Some(ExpiryReason::LinkExpired)
        );
    }

    #[test]
    fn deleting_a_program_cancels_its_links() {
        let h = Harness::new();
        let program = gated(&h);
        let link = h.link(program, UserId::new());
        h.engine
            .set_program_status(program, ProgramStatus::Deleted)
            .unwrap();
        assert_eq!(h.engine.link(link.id).unwrap().status(), LinkStatus::Cancelled);
        assert!(h.engine.cancel_link(link.id).is_ok());
    }
}
