//! # rpe-pathway — Pathway Model and Progress Evaluation
//!
//! A pathway is the tree of steps and tasks a referee must satisfy before
//! their claim counts as a completed referral.
//!
//! - [`model`]: the validated, immutable [`PathwayModel`] and its content
//!   digest [`PathwayVersion`]. Construction is the only place structural
//!   validity is enforced.
//! - [`facts`]: the [`TaskFactProvider`] seam through which task completion
//!   facts enter, plus the per-entity-type [`FactRegistry`].
//! - [`evaluator`]: the pure [`evaluate()`] function producing a
//!   [`PathwayProgress`] snapshot.
//! - [`completability`]: structural satisfiability of a pathway, used by the
//!   program health probe.

pub mod completability;
pub mod evaluator;
pub mod facts;
pub mod model;

pub use completability::{check_completable, Completability};
pub use evaluator::{evaluate, EvaluationError, PathwayProgress, StepProgress, TaskProgress};
pub use facts::{
    EntityFactSource, FactError, FactRegistry, FactTable, InMemoryFactSource, TaskFact,
    TaskFactProvider, UserFacts,
};
pub use model::{
    CompletionRule, EntityRef, EntityType, OrderMode, PathwayDefinition, PathwayModel,
    PathwayVersion, Step, StepDefinition, Task, TaskDefinition, ValidationError,
};
