//! # Referral Engine
//!
//! [`ReferralEngine`] owns the program, link and usage records, the claim
//! ledger, every pathway version it has seen, and the per-usage locks. The
//! operations live in sibling modules as further `impl ReferralEngine`
//! blocks:
//!
//! - [`crate::intake`]: link creation, claims, proof of personhood
//! - [`crate::pipeline`]: the locked evaluation of one usage
//! - [`crate::maintenance`]: link cancellation/expiry cascades, blocks
//! - [`crate::health`]: program health probe and program expiration
//! - [`crate::sweeper`]: the time-boxed background sweep
//!
//! Collaborators (clock, fact sources, block registry, event sink, ledger)
//! are injected through `with_*` builders so tests can substitute fakes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use rpe_core::{Clock, LinkId, ProgramId, SystemClock, Timestamp, UsageId};
use rpe_ledger::{ClaimLedger, LinkTotals, ProgramTotals, RewardSettlement};
use rpe_pathway::{FactRegistry, PathwayModel, PathwayVersion};
use rpe_state::{
    PendingReason, Program, ProgramStatus, ReferralLink, ReferralLinkUsage, UsageStatus,
};

use crate::abuse::{BlockRegistry, InMemoryBlockRegistry, ReferralAbuseGate};
use crate::capacity::ProgramCapacityGuard;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink, NoopSink};
use crate::lock::UsageLocks;
use crate::store::Store;

pub struct ReferralEngine {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) programs: Store<ProgramId, Program>,
    pub(crate) links: Store<LinkId, ReferralLink>,
    pub(crate) usages: Store<UsageId, ReferralLinkUsage>,
    pub(crate) pathways: Store<PathwayVersion, PathwayModel>,
    pub(crate) ledger: Arc<ClaimLedger>,
    pub(crate) facts: FactRegistry,
    pub(crate) blocks: Arc<dyn BlockRegistry>,
    pub(crate) locks: UsageLocks,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) settlement: RewardSettlement,
    /// Serializes claim and link intake so per-referee uniqueness holds.
    pub(crate) intake: Mutex<()>,
}

impl std::fmt::Debug for ReferralEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferralEngine")
            .field("config", &self.config)
            .field("programs", &self.programs.len())
            .field("links", &self.links.len())
            .field("usages", &self.usages.len())
            .field("pathway_versions", &self.pathways.len())
            .finish_non_exhaustive()
    }
}

/// Read model of one usage for callers that render progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub usage_id: UsageId,
    pub status: UsageStatus,
    pub percent_complete: u8,
    pub time_remaining_in_days: Option<u32>,
    pub pending_reason: Option<PendingReason>,
    pub proof_of_personhood_completed: bool,
}

impl ReferralEngine {
    pub fn new(config: EngineConfig) -> Self {
        let settlement = RewardSettlement::new(config.payout_policy);
        Self {
            config,
            clock: Arc::new(SystemClock),
            programs: Store::new(),
            links: Store::new(),
            usages: Store::new(),
            pathways: Store::new(),
            ledger: Arc::new(ClaimLedger::new()),
            facts: FactRegistry::new(),
            blocks: Arc::new(InMemoryBlockRegistry::new()),
            locks: UsageLocks::new(),
            events: Arc::new(NoopSink),
            settlement,
            intake: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_facts(mut self, facts: FactRegistry) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_block_registry(mut self, blocks: Arc<dyn BlockRegistry>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Share a ledger (e.g. one restored from persisted counters).
    pub fn with_ledger(mut self, ledger: Arc<ClaimLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ClaimLedger {
        &self.ledger
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ── Programs ─────────────────────────────────────────────────────

    /// Validate and store a program. Its pathway, if any, becomes a known
    /// version.
    pub fn register_program(&self, program: Program) -> Result<ProgramId, EngineError> {
        program.validate()?;
        if let Some(pathway) = &program.pathway {
            self.pathways.insert(pathway.version(), pathway.clone());
        }
        let id = program.id;
        tracing::info!(
            program_id = %id,
            name = %program.name,
            status = %program.status(),
            pathway_version = ?program.pathway.as_ref().map(|p| p.version().to_string()),
            "program registered"
        );
        self.programs.insert(id, program);
        Ok(id)
    }

    /// Attach a new pathway to a program. Usages claimed earlier keep the
    /// version they were claimed against.
    pub fn replace_pathway(
        &self,
        program_id: ProgramId,
        pathway: PathwayModel,
    ) -> Result<PathwayVersion, EngineError> {
        let version = pathway.version();
        let now = self.now();
        self.programs
            .try_update(&program_id, |program| {
                let mut edited = program.clone();
                edited.pathway = Some(pathway.clone());
                edited.pathway_required = true;
                edited.date_modified = now;
                edited.validate()?;
                *program = edited;
                Ok::<_, EngineError>(())
            })
            .ok_or_else(|| EngineError::not_found("program", program_id))??;
        self.pathways.insert(version, pathway);
        tracing::info!(program_id = %program_id, pathway_version = %version, "pathway replaced");
        Ok(version)
    }

    pub fn program(&self, id: ProgramId) -> Option<Program> {
        self.programs.get(&id)
    }

    pub fn pathway_version(&self, version: &PathwayVersion) -> Option<PathwayModel> {
        self.pathways.get(version)
    }

    pub fn program_totals(&self, id: ProgramId) -> Result<ProgramTotals, EngineError> {
        let program = self.require_program(id)?;
        Ok(self.ledger.program_totals(&program))
    }

    /// Admin status change. Expiry and deletion run their cascades.
    pub fn set_program_status(
        &self,
        id: ProgramId,
        to: ProgramStatus,
    ) -> Result<(), EngineError> {
        match to {
            ProgramStatus::Expired => self.expire_program(id),
            ProgramStatus::Deleted => {
                self.transition_program(id, to)?;
                self.cancel_links_by_program(id);
                Ok(())
            }
            _ => self.transition_program(id, to),
        }
    }

    // ── Links and usages ─────────────────────────────────────────────

    pub fn link(&self, id: LinkId) -> Option<ReferralLink> {
        self.links.get(&id)
    }

    pub fn link_totals(&self, id: LinkId) -> Result<LinkTotals, EngineError> {
        let link = self
            .links
            .get(&id)
            .ok_or_else(|| EngineError::not_found("link", id))?;
        let program = self.require_program(link.program_id)?;
        Ok(self.ledger.link_totals(&program, id))
    }

    /// Whether the link's owner currently has an active block.
    pub fn link_blocked(&self, id: LinkId) -> Result<bool, EngineError> {
        let link = self
            .links
            .get(&id)
            .ok_or_else(|| EngineError::not_found("link", id))?;
        Ok(self.abuse_gate().is_blocked(link.user_id))
    }

    pub fn usage(&self, id: UsageId) -> Option<ReferralLinkUsage> {
        self.usages.get(&id)
    }

    pub fn usages_for_link(&self, link: LinkId) -> Vec<ReferralLinkUsage> {
        let mut usages = self.usages.filter(|u| u.link_id == link);
        usages.sort_by_key(|u| (u.date_claimed, u.id));
        usages
    }

    pub fn usage_summary(&self, id: UsageId) -> Result<UsageSummary, EngineError> {
        let usage = self
            .usages
            .get(&id)
            .ok_or_else(|| EngineError::not_found("usage", id))?;
        let program = self.require_program(usage.program_id)?;
        let now = self.now();
        Ok(UsageSummary {
            usage_id: id,
            status: usage.status(),
            percent_complete: usage.percent_complete(&program),
            time_remaining_in_days: usage.time_remaining_in_days(&program, now),
            pending_reason: usage.pending_reason(),
            proof_of_personhood_completed: usage.proof_of_personhood().is_some(),
        })
    }

    // ── Shared helpers ───────────────────────────────────────────────

    pub(crate) fn require_program(&self, id: ProgramId) -> Result<Program, EngineError> {
        self.programs
            .get(&id)
            .ok_or_else(|| EngineError::not_found("program", id))
    }

    pub(crate) fn abuse_gate(&self) -> ReferralAbuseGate<'_> {
        ReferralAbuseGate::new(&*self.blocks)
    }

    pub(crate) fn capacity_guard(&self) -> ProgramCapacityGuard<'_> {
        ProgramCapacityGuard::new(&self.ledger, self.abuse_gate())
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    /// Move a program to `to`, logging and emitting the change.
    pub(crate) fn transition_program(
        &self,
        id: ProgramId,
        to: ProgramStatus,
    ) -> Result<(), EngineError> {
        let now = self.now();
        let from = self
            .programs
            .try_update(&id, |program| {
                let from = program.status();
                program.transition(to, now).map(|()| from)
            })
            .ok_or_else(|| EngineError::not_found("program", id))??;
        tracing::info!(program_id = %id, from = %from, to = %to, "program status changed");
        self.emit(EngineEvent::ProgramStatusChanged {
            program_id: id,
            from,
            to,
            at: now,
        });
        Ok(())
    }

    /// Move one link to `to` if its current status allows it. Returns
    /// whether the link changed.
    pub(crate) fn transition_link(&self, id: LinkId, to: rpe_state::LinkStatus) -> bool {
        let now = self.now();
        let changed = self.links.try_update(&id, |link| {
            let from = link.status();
            link.transition(to, now).map(|()| (from, link.program_id))
        });
        match changed {
            Some(Ok((from, program_id))) => {
                tracing::info!(link_id = %id, from = %from, to = %to, "link status changed");
                self.emit(EngineEvent::LinkStatusChanged {
                    link_id: id,
                    program_id,
                    from,
                    to,
                    at: now,
                });
                true
            }
            Some(Err(err)) => {
                tracing::debug!(link_id = %id, error = %err, "link transition skipped");
                false
            }
            None => false,
        }
    }
}
