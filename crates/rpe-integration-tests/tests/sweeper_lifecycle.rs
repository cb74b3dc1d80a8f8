//! # Background Sweeper Lifecycle
//!
//! The sweeper expires ended programs with their links and usages, flags
//! programs whose pathway can no longer be finished, and completes usages
//! whose facts changed while nobody was looking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use rpe_core::{ManualClock, OpportunityId, Timestamp, UserId};
use rpe_engine::{
    BackgroundSweeper, ChannelSink, ClaimRequest, EngineConfig, EngineEvent, FactChangeSource,
    ReferralEngine,
};
use rpe_pathway::{
    CompletionRule, EntityRef, EntityType, FactRegistry, InMemoryFactSource, OrderMode,
    PathwayDefinition, PathwayModel, StepDefinition, TaskDefinition,
};
use rpe_state::{ExpiryReason, LinkStatus, Program, ProgramStatus, UsageStatus};

fn start() -> Timestamp {
    Timestamp::parse("2026-03-01T00:00:00Z").unwrap()
}

fn pathway(entity: EntityRef) -> PathwayModel {
    PathwayModel::new(PathwayDefinition {
        id: Default::default(),
        name: String::new(),
        rule: CompletionRule::Any,
        order_mode: OrderMode::AnyOrder,
        steps: vec![StepDefinition {
            id: Default::default(),
            name: String::new(),
            rule: CompletionRule::All,
            order_mode: OrderMode::AnyOrder,
            order: None,
            tasks: vec![TaskDefinition {
                id: Default::default(),
                entity: Some(entity),
                order: None,
            }],
        }],
    })
    .unwrap()
}

struct Setup {
    engine: Arc<ReferralEngine>,
    clock: Arc<ManualClock>,
    facts: InMemoryFactSource,
}

fn setup(sink: Option<ChannelSink>) -> Setup {
    let clock = Arc::new(ManualClock::new(start()));
    let facts = InMemoryFactSource::new(EntityType::Opportunity);
    let mut engine = ReferralEngine::new(EngineConfig {
        sweep_interval_secs: 1,
        sweep_batch_size: 3,
        ..EngineConfig::default()
    })
    .with_clock(clock.clone())
    .with_facts(FactRegistry::new().with_source(Arc::new(facts.clone())));
    if let Some(sink) = sink {
        engine = engine.with_events(Arc::new(sink));
    }
    Setup {
        engine: Arc::new(engine),
        clock,
        facts,
    }
}

fn claim(engine: &ReferralEngine, link: rpe_core::LinkId) -> rpe_state::ReferralLinkUsage {
    engine
        .claim(&ClaimRequest {
            link_id: link,
            referee_id: UserId::new(),
            referee_onboarded_at: Some(engine.now()),
        })
        .unwrap()
}

#[test]
fn one_cycle_expires_ended_program_and_completes_dirty_usages() {
    let s = setup(None);
    let task = EntityRef::Opportunity(OpportunityId::new());

    let ending = s
        .engine
        .register_program(
            Program::new("ending", start())
                .with_date_end(start().add_days(5))
                .with_pathway(pathway(task)),
        )
        .unwrap();
    let ending_link = s.engine.create_link(ending, UserId::new(), "main").unwrap();
    let stranded = claim(&s.engine, ending_link.id);

    let ongoing = s
        .engine
        .register_program(Program::new("ongoing", start()).with_pathway(pathway(task)))
        .unwrap();
    let ongoing_link = s.engine.create_link(ongoing, UserId::new(), "main").unwrap();
    let finishers: Vec<_> = (0..7).map(|_| claim(&s.engine, ongoing_link.id)).collect();

    s.clock.advance_days(6);
    for usage in &finishers {
        s.facts.complete(usage.referee_id, task, s.engine.now());
        s.engine
            .notify_fact_changed(usage.referee_id, FactChangeSource::OpportunityCompletion);
    }

    let cycle = BackgroundSweeper::new(Arc::clone(&s.engine)).run_once();
    assert_eq!(cycle.programs_expired, 1);
    assert_eq!(cycle.usages.completed, 7);
    assert_eq!(cycle.usages.batches, 3);
    assert!(!cycle.usages.deadline_reached);

    assert_eq!(s.engine.program(ending).unwrap().status(), ProgramStatus::Expired);
    assert_eq!(s.engine.link(ending_link.id).unwrap().status(), LinkStatus::Expired);
    let stranded = s.engine.usage(stranded.id).unwrap();
    assert_eq!(stranded.status(), UsageStatus::Expired);
    assert_eq!(stranded.expiry_reason(), Some(ExpiryReason::ProgramExpired));
    assert_eq!(
        s.engine.program_totals(ongoing).unwrap().completion_total,
        7
    );

    // A second cycle finds nothing to do.
    let again = BackgroundSweeper::new(Arc::clone(&s.engine)).run_once();
    assert_eq!(again.programs_expired, 0);
    assert_eq!(again.usages.evaluated, 0);
}

#[test]
fn retired_opportunity_marks_program_uncompletable() {
    let s = setup(None);
    let task = EntityRef::Opportunity(OpportunityId::new());
    let program = s
        .engine
        .register_program(Program::new("fragile", start()).with_pathway(pathway(task)))
        .unwrap();

    s.facts.retire(task);
    let cycle = BackgroundSweeper::new(Arc::clone(&s.engine)).run_once();
    assert_eq!(cycle.health.marked_uncompletable, 1);
    assert_eq!(
        s.engine.program(program).unwrap().status(),
        ProgramStatus::UnCompletable
    );
    assert!(s.engine.create_link(program, UserId::new(), "late").is_err());
}

#[tokio::test]
async fn spawned_sweeper_publishes_expiry_events() {
    let (sink, mut events) = ChannelSink::new();
    let s = setup(Some(sink));
    let task = EntityRef::Opportunity(OpportunityId::new());
    let program = s
        .engine
        .register_program(
            Program::new("windowed", start())
                .with_completion_window_days(3)
                .with_pathway(pathway(task)),
        )
        .unwrap();
    let link = s.engine.create_link(program, UserId::new(), "main").unwrap();
    let usage = claim(&s.engine, link.id);
    s.clock.advance_days(4);

    let (shutdown, rx) = watch::channel(false);
    let handle = BackgroundSweeper::new(Arc::clone(&s.engine)).spawn(rx);

    let expired = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let EngineEvent::UsageExpired { usage_id, reason, .. } = event {
                return Some((usage_id, reason));
            }
        }
        None
    })
    .await
    .expect("sweeper did not run in time");
    assert_eq!(
        expired,
        Some((usage.id, ExpiryReason::CompletionWindowElapsed))
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}
