//! Shared fixtures for the engine's unit tests.

use std::sync::Arc;

use rpe_core::{ManualClock, OpportunityId, ProgramId, Timestamp, UserId};
use rpe_pathway::{
    CompletionRule, EntityRef, EntityType, FactRegistry, InMemoryFactSource, OrderMode,
    PathwayDefinition, PathwayModel, StepDefinition, TaskDefinition,
};
use rpe_state::{Program, ReferralLink, ReferralLinkUsage};

use crate::abuse::InMemoryBlockRegistry;
use crate::config::EngineConfig;
use crate::engine::ReferralEngine;
use crate::error::EngineError;
use crate::events::RecordingSink;
use crate::intake::ClaimRequest;

pub(crate) fn start() -> Timestamp {
    Timestamp::parse("2026-03-01T00:00:00Z").unwrap()
}

pub(crate) fn opportunity() -> EntityRef {
    EntityRef::Opportunity(OpportunityId::new())
}

/// One All step over `entities`, in any order.
pub(crate) fn pathway(entities: &[EntityRef]) -> PathwayModel {
    PathwayModel::new(PathwayDefinition {
        id: Default::default(),
        name: "pathway".to_string(),
        rule: CompletionRule::All,
        order_mode: OrderMode::AnyOrder,
        steps: vec![StepDefinition {
            id: Default::default(),
            name: "step".to_string(),
            rule: CompletionRule::All,
            order_mode: OrderMode::AnyOrder,
            order: None,
            tasks: entities
                .iter()
                .map(|entity| TaskDefinition {
                    id: Default::default(),
                    entity: Some(*entity),
                    order: None,
                })
                .collect(),
        }],
    })
    .unwrap()
}

pub(crate) struct Harness {
    pub engine: Arc<ReferralEngine>,
    pub clock: Arc<ManualClock>,
    pub facts: InMemoryFactSource,
    pub events: Arc<RecordingSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let facts = InMemoryFactSource::new(EntityType::Opportunity);
        let events = Arc::new(RecordingSink::new());
        let engine = ReferralEngine::new(config)
            .with_clock(clock.clone())
            .with_facts(FactRegistry::new().with_source(Arc::new(facts.clone())))
            .with_block_registry(Arc::new(InMemoryBlockRegistry::new()))
            .with_events(events.clone());
        Self {
            engine: Arc::new(engine),
            clock,
            facts,
            events,
        }
    }

    pub fn program(&self, program: Program) -> ProgramId {
        self.engine.register_program(program).unwrap()
    }

    pub fn link(&self, program: ProgramId, referrer: UserId) -> ReferralLink {
        self.link_named(program, referrer, "main")
    }

    pub fn link_named(&self, program: ProgramId, referrer: UserId, name: &str) -> ReferralLink {
        self.engine.create_link(program, referrer, name).unwrap()
    }

    /// Claim as a fresh referee who just onboarded.
    pub fn claim(&self, link: rpe_core::LinkId) -> Result<ReferralLinkUsage, EngineError> {
        self.claim_as(link, UserId::new())
    }

    pub fn claim_as(
        &self,
        link: rpe_core::LinkId,
        referee: UserId,
    ) -> Result<ReferralLinkUsage, EngineError> {
        self.engine.claim(&ClaimRequest {
            link_id: link,
            referee_id: referee,
            referee_onboarded_at: Some(self.engine.now()),
        })
    }
}
