//! # rpe-engine — Referral Pathway Engine
//!
//! Ties the pathway, state and ledger crates into one service object,
//! [`ReferralEngine`]:
//!
//! - **Intake** creates links and Pending usages, enforcing the claim rules.
//! - **Pipeline** evaluates one usage under a per-usage lock: expiry first,
//!   then the [`ProgramCapacityGuard`] (which consults the
//!   [`ReferralAbuseGate`]), then the pathway version the usage was
//!   claimed against, then slot reservation and reward settlement.
//! - **Maintenance** runs the link and usage cascades behind program
//!   expiry, program deletion and referrer blocks.
//! - **Health** and the [`BackgroundSweeper`] are deadline-bounded batch
//!   jobs driven by a tokio interval.
//!
//! State transitions are published as [`EngineEvent`]s through an
//! [`EventSink`], logged with `tracing`, and counted with `metrics`.

pub mod abuse;
pub mod capacity;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod intake;
pub mod lock;
pub mod maintenance;
pub mod pipeline;
pub mod store;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testkit;

pub use abuse::{Block, BlockRegistry, BlockRequest, InMemoryBlockRegistry, ReferralAbuseGate};
pub use capacity::ProgramCapacityGuard;
pub use config::{ConfigError, EngineConfig};
pub use engine::{ReferralEngine, UsageSummary};
pub use error::{ClaimRejection, EngineError, LinkRejection};
pub use events::{ChannelSink, EngineEvent, EventSink, NoopSink, RecordingSink};
pub use health::HealthReport;
pub use intake::ClaimRequest;
pub use pipeline::{EvaluationOutcome, FactChangeSource};
pub use sweeper::{BackgroundSweeper, SweepCycle, SweepReport};
