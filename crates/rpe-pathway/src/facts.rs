//! # Task Facts
//!
//! Task completion is an external fact (for opportunities: "the referee's
//! completion of this opportunity was verified"). The evaluator reads facts
//! only through [`TaskFactProvider`], so it can be driven by fakes.
//!
//! Production wiring registers one [`EntityFactSource`] per [`EntityType`]
//! in a [`FactRegistry`]; [`FactRegistry::for_user()`] then yields a
//! provider scoped to one referee.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rpe_core::{Timestamp, UserId};

use crate::model::{EntityRef, EntityType, Task};

/// Completion state of one task for one referee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskFact {
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl TaskFact {
    pub fn completed(at: Timestamp) -> Self {
        Self {
            completed: true,
            completed_at: Some(at),
        }
    }

    pub fn incomplete() -> Self {
        Self::default()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactError {
    #[error("no fact source registered for entity type {entity_type}")]
    NoSource { entity_type: EntityType },

    #[error("fact source unavailable for {entity}: {detail}")]
    Unavailable { entity: EntityRef, detail: String },
}

/// Supplies the completion fact for a task.
pub trait TaskFactProvider {
    fn task_fact(&self, task: &Task) -> Result<TaskFact, FactError>;
}

impl<F> TaskFactProvider for F
where
    F: Fn(&Task) -> Result<TaskFact, FactError>,
{
    fn task_fact(&self, task: &Task) -> Result<TaskFact, FactError> {
        self(task)
    }
}

/// A per-entity-type backend for task facts.
pub trait EntityFactSource: Send + Sync + fmt::Debug {
    /// The entity type this source answers for.
    fn entity_type(&self) -> EntityType;

    /// Whether `user` has completed `entity`.
    fn fact(&self, user: UserId, entity: &EntityRef) -> Result<TaskFact, FactError>;

    /// Whether `entity` can still be completed by anyone (exists, is
    /// published, is not past its end date).
    fn is_completable(&self, entity: &EntityRef) -> bool;
}

// ── Registry ─────────────────────────────────────────────────────────

/// Fact sources keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct FactRegistry {
    sources: HashMap<EntityType, Arc<dyn EntityFactSource>>,
}

impl FactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, replacing any previous one for the same type.
    pub fn register(&mut self, source: Arc<dyn EntityFactSource>) -> &mut Self {
        self.sources.insert(source.entity_type(), source);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn EntityFactSource>) -> Self {
        self.register(source);
        self
    }

    /// A provider answering for one referee.
    pub fn for_user(&self, user: UserId) -> UserFacts<'_> {
        UserFacts {
            registry: self,
            user,
        }
    }

    /// Structural completability of an entity. Unknown entity types are
    /// reported non-completable.
    pub fn is_entity_completable(&self, entity: &EntityRef) -> bool {
        self.sources
            .get(&entity.entity_type())
            .is_some_and(|s| s.is_completable(entity))
    }
}

/// [`TaskFactProvider`] for a single referee, backed by a [`FactRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct UserFacts<'a> {
    registry: &'a FactRegistry,
    user: UserId,
}

impl TaskFactProvider for UserFacts<'_> {
    fn task_fact(&self, task: &Task) -> Result<TaskFact, FactError> {
        let entity_type = task.entity.entity_type();
        let source = self
            .registry
            .sources
            .get(&entity_type)
            .ok_or(FactError::NoSource { entity_type })?;
        source.fact(self.user, &task.entity)
    }
}

// ── Static Table ─────────────────────────────────────────────────────

/// A fixed table of facts for one referee. Missing entries read as
/// incomplete.
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    facts: HashMap<EntityRef, TaskFact>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityRef, fact: TaskFact) -> &mut Self {
        self.facts.insert(entity, fact);
        self
    }

    pub fn with(mut self, entity: EntityRef, fact: TaskFact) -> Self {
        self.insert(entity, fact);
        self
    }
}

impl TaskFactProvider for FactTable {
    fn task_fact(&self, task: &Task) -> Result<TaskFact, FactError> {
        Ok(self.facts.get(&task.entity).copied().unwrap_or_default())
    }
}

// ── In-Memory Source ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct InMemoryFacts {
    completions: HashMap<(UserId, EntityRef), Timestamp>,
    retired: HashSet<EntityRef>,
}

/// An [`EntityFactSource`] held in memory, for tests and embedding.
#[derive(Debug, Clone)]
pub struct InMemoryFactSource {
    entity_type: EntityType,
    inner: Arc<RwLock<InMemoryFacts>>,
}

impl InMemoryFactSource {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            inner: Arc::new(RwLock::new(InMemoryFacts::default())),
        }
    }

    /// Record that `user` completed `entity` at `at`.
    pub fn complete(&self, user: UserId, entity: EntityRef, at: Timestamp) {
        self.inner.write().completions.insert((user, entity), at);
    }

    /// Mark an entity as no longer completable by anyone.
    pub fn retire(&self, entity: EntityRef) {
        self.inner.write().retired.insert(entity);
    }

    /// Undo [`retire`](Self::retire).
    pub fn restore(&self, entity: &EntityRef) {
        self.inner.write().retired.remove(entity);
    }
}

impl EntityFactSource for InMemoryFactSource {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn fact(&self, user: UserId, entity: &EntityRef) -> Result<TaskFact, FactError> {
        Ok(self
            .inner
            .read()
            .completions
            .get(&(user, *entity))
            .map(|at| TaskFact::completed(*at))
            .unwrap_or_default())
    }

    fn is_completable(&self, entity: &EntityRef) -> bool {
        !self.inner.read().retired.contains(entity)
    }
}
