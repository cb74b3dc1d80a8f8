//! # Pathway Model
//!
//! The immutable definition of a referral pathway: a pathway owns ordered
//! steps, each step owns ordered tasks, and each task references one
//! external entity whose completion by the referee is the underlying fact.
//!
//! Input arrives as a [`PathwayDefinition`] (deserializable, unvalidated).
//! [`PathwayModel::new()`] validates it, sorts children into display order,
//! derives `order_display` as a contiguous `1..=N` sequence and computes the
//! [`PathwayVersion`] digest. A `PathwayModel` cannot be constructed any
//! other way, so holding one means the tree is structurally valid.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rpe_core::{
    sha256_digest, CanonicalBytes, CanonicalizationError, ContentDigest, OpportunityId, PathwayId,
    StepId, TaskId,
};

// ── Rules ────────────────────────────────────────────────────────────

/// Whether every child or any single child satisfies the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionRule {
    All,
    Any,
}

/// Whether children must be satisfied in their declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderMode {
    Sequential,
    #[default]
    AnyOrder,
}

impl CompletionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Any => "ANY",
        }
    }
}

impl std::fmt::Display for CompletionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entity References ────────────────────────────────────────────────

/// The kind of external entity a task points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Opportunity,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opportunity => f.write_str("OPPORTUNITY"),
        }
    }
}

/// A typed reference to the external entity behind a task.
///
/// New entity kinds are added as variants; fact sources are registered per
/// [`EntityType`] in the [`FactRegistry`](crate::FactRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "id")]
pub enum EntityRef {
    Opportunity(OpportunityId),
}

impl EntityRef {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Opportunity(_) => EntityType::Opportunity,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opportunity(id) => write!(f, "{id}"),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// Structural defects in a pathway definition.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("pathway {pathway} has no steps")]
    EmptyPathway { pathway: PathwayId },

    #[error("step {step} has no tasks")]
    EmptyStep { step: StepId },

    #[error("duplicate order {order} among sequential children of {scope}")]
    DuplicateOrder { scope: String, order: u32 },

    #[error("task {task} in step {step} has no entity reference")]
    MissingEntity { step: StepId, task: TaskId },

    #[error("entity {entity} referenced more than once in step {step}")]
    DuplicateEntity { step: StepId, entity: EntityRef },

    #[error("identifier {id} used more than once in the pathway")]
    DuplicateId { id: String },

    #[error("failed to compute pathway version: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

// ── Definitions (unvalidated input) ──────────────────────────────────

/// A pathway as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathwayDefinition {
    pub id: PathwayId,
    #[serde(default)]
    pub name: String,
    pub rule: CompletionRule,
    #[serde(default)]
    pub order_mode: OrderMode,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: StepId,
    #[serde(default)]
    pub name: String,
    pub rule: CompletionRule,
    #[serde(default)]
    pub order_mode: OrderMode,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    #[serde(default)]
    pub entity: Option<EntityRef>,
    #[serde(default)]
    pub order: Option<u32>,
}

// ── Validated Model ──────────────────────────────────────────────────

/// Content digest of a pathway's structure.
///
/// A usage records the version it was claimed against and is always
/// re-evaluated against that version, never against a later edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathwayVersion(ContentDigest);

impl PathwayVersion {
    pub fn digest(&self) -> &ContentDigest {
        &self.0
    }
}

impl std::fmt::Display for PathwayVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub entity: EntityRef,
    pub order: Option<u32>,
    /// Contiguous 1-based position within the step.
    pub order_display: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub rule: CompletionRule,
    pub order_mode: OrderMode,
    pub order: Option<u32>,
    /// Contiguous 1-based position within the pathway.
    pub order_display: u32,
    pub tasks: Vec<Task>,
}

/// A structurally valid, immutable pathway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PathwayDefinition")]
pub struct PathwayModel {
    id: PathwayId,
    name: String,
    rule: CompletionRule,
    order_mode: OrderMode,
    steps: Vec<Step>,
    version: PathwayVersion,
}

impl PathwayModel {
    /// Validate a definition and build the model.
    ///
    /// Rejects: a pathway without steps, a step without tasks, a task
    /// without an entity, the same entity twice in one step, reused step
    /// or task ids, and duplicate explicit `order` values among the
    /// children of a `Sequential` parent.
    pub fn new(def: PathwayDefinition) -> Result<Self, ValidationError> {
        if def.steps.is_empty() {
            return Err(ValidationError::EmptyPathway { pathway: def.id });
        }
        if def.order_mode == OrderMode::Sequential {
            check_unique_orders(def.steps.iter().map(|s| s.order), || {
                format!("pathway {}", def.id)
            })?;
        }

        let mut seen_ids = HashSet::new();
        let mut steps = Vec::with_capacity(def.steps.len());
        for step_def in display_order(def.steps, |s| s.order) {
            if !seen_ids.insert(step_def.id.to_string()) {
                return Err(ValidationError::DuplicateId {
                    id: step_def.id.to_string(),
                });
            }
            if step_def.tasks.is_empty() {
                return Err(ValidationError::EmptyStep { step: step_def.id });
            }
            if step_def.order_mode == OrderMode::Sequential {
                check_unique_orders(step_def.tasks.iter().map(|t| t.order), || {
                    format!("step {}", step_def.id)
                })?;
            }

            let mut seen_entities = HashSet::new();
            let mut tasks = Vec::with_capacity(step_def.tasks.len());
            for task_def in display_order(step_def.tasks, |t| t.order) {
                if !seen_ids.insert(task_def.id.to_string()) {
                    return Err(ValidationError::DuplicateId {
                        id: task_def.id.to_string(),
                    });
                }
                let entity = task_def.entity.ok_or(ValidationError::MissingEntity {
                    step: step_def.id,
                    task: task_def.id,
                })?;
                if !seen_entities.insert(entity) {
                    return Err(ValidationError::DuplicateEntity {
                        step: step_def.id,
                        entity,
                    });
                }
                tasks.push(Task {
                    id: task_def.id,
                    entity,
                    order: task_def.order,
                    order_display: tasks.len() as u32 + 1,
                });
            }

            steps.push(Step {
                id: step_def.id,
                name: step_def.name,
                rule: step_def.rule,
                order_mode: step_def.order_mode,
                order: step_def.order,
                order_display: steps.len() as u32 + 1,
                tasks,
            });
        }

        let version = compute_version(def.id, def.rule, def.order_mode, &steps)?;
        Ok(Self {
            id: def.id,
            name: def.name,
            rule: def.rule,
            order_mode: def.order_mode,
            steps,
            version,
        })
    }

    pub fn id(&self) -> PathwayId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> CompletionRule {
        self.rule
    }

    pub fn order_mode(&self) -> OrderMode {
        self.order_mode
    }

    pub fn version(&self) -> PathwayVersion {
        self.version
    }

    /// Steps in display order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every `(step_index, step, task_index, task)` in display order.
    pub fn walk(&self) -> impl Iterator<Item = (usize, &Step, usize, &Task)> + '_ {
        self.steps.iter().enumerate().flat_map(|(si, step)| {
            step.tasks
                .iter()
                .enumerate()
                .map(move |(ti, task)| (si, step, ti, task))
        })
    }

    pub fn task_count(&self) -> usize {
        self.steps.iter().map(|s| s.tasks.len()).sum()
    }

    /// Whether any task references `entity`.
    pub fn references(&self, entity: &EntityRef) -> bool {
        self.walk().any(|(_, _, _, t)| &t.entity == entity)
    }
}

impl TryFrom<PathwayDefinition> for PathwayModel {
    type Error = ValidationError;

    fn try_from(def: PathwayDefinition) -> Result<Self, Self::Error> {
        Self::new(def)
    }
}

/// Explicitly ordered children first by `order`, then unordered children
/// in input position. Ties keep input position.
fn display_order<T>(items: Vec<T>, order: impl Fn(&T) -> Option<u32>) -> Vec<T> {
    let mut keyed: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(pos, item)| ((order(&item).is_none(), order(&item).unwrap_or(0), pos), item))
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, item)| item).collect()
}

fn check_unique_orders(
    orders: impl Iterator<Item = Option<u32>>,
    scope: impl Fn() -> String,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for order in orders.flatten() {
        if !seen.insert(order) {
            return Err(ValidationError::DuplicateOrder {
                scope: scope(),
                order,
            });
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct VersionedTask<'a> {
    id: &'a TaskId,
    entity: &'a EntityRef,
}

#[derive(Serialize)]
struct VersionedStep<'a> {
    id: &'a StepId,
    rule: CompletionRule,
    order_mode: OrderMode,
    tasks: Vec<VersionedTask<'a>>,
}

#[derive(Serialize)]
struct VersionedPathway<'a> {
    id: PathwayId,
    rule: CompletionRule,
    order_mode: OrderMode,
    steps: Vec<VersionedStep<'a>>,
}

/// Digest over the evaluation-relevant structure. Names are excluded, so
/// renaming a step does not fork the version.
fn compute_version(
    id: PathwayId,
    rule: CompletionRule,
    order_mode: OrderMode,
    steps: &[Step],
) -> Result<PathwayVersion, ValidationError> {
    let view = VersionedPathway {
        id,
        rule,
        order_mode,
        steps: steps
            .iter()
            .map(|s| VersionedStep {
                id: &s.id,
                rule: s.rule,
                order_mode: s.order_mode,
                tasks: s
                    .tasks
                    .iter()
                    .map(|t| VersionedTask {
                        id: &t.id,
                        entity: &t.entity,
                    })
                    .collect(),
            })
            .collect(),
    };
    let bytes = CanonicalBytes::new(&view)?;
    Ok(PathwayVersion(sha256_digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(order: Option<u32>) -> TaskDefinition {
        TaskDefinition {
            id: TaskId::new(),
            entity: Some(EntityRef::Opportunity(OpportunityId::new())),
            order,
        }
    }

    fn step(order: Option<u32>, mode: OrderMode, tasks: Vec<TaskDefinition>) -> StepDefinition {
        StepDefinition {
            id: StepId::new(),
            name: String::new(),
            rule: CompletionRule::All,
            order_mode: mode,
            order,
            tasks,
        }
    }

    fn pathway(mode: OrderMode, steps: Vec<StepDefinition>) -> PathwayDefinition {
        PathwayDefinition {
            id: PathwayId::new(),
            name: "onboarding".into(),
            rule: CompletionRule::All,
            order_mode: mode,
            steps,
        }
    }

    #[test]
    fn rejects_pathway_without_steps() {
        let err = PathwayModel::new(pathway(OrderMode::AnyOrder, vec![])).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyPathway { .. }));
    }

    #[test]
    fn rejects_step_without_tasks() {
        let def = pathway(
            OrderMode::AnyOrder,
            vec![step(None, OrderMode::AnyOrder, vec![])],
        );
        assert!(matches!(
            PathwayModel::new(def).unwrap_err(),
            ValidationError::EmptyStep { .. }
        ));
    }

    #[test]
    fn rejects_task_without_entity() {
        let mut t = task(None);
        t.entity = None;
        let def = pathway(OrderMode::AnyOrder, vec![step(None, OrderMode::AnyOrder, vec![t])]);
        assert!(matches!(
            PathwayModel::new(def).unwrap_err(),
            ValidationError::MissingEntity { .. }
        ));
    }

    #[test]
    fn rejects_duplicate_order_only_under_sequential() {
        let tasks = vec![task(Some(1)), task(Some(1))];
        let seq = pathway(
            OrderMode::AnyOrder,
            vec![step(None, OrderMode::Sequential, tasks.clone())],
        );
        assert!(matches!(
            PathwayModel::new(seq).unwrap_err(),
            ValidationError::DuplicateOrder { order: 1, .. }
        ));

        let any = pathway(
            OrderMode::AnyOrder,
            vec![step(None, OrderMode::AnyOrder, tasks)],
        );
        assert!(PathwayModel::new(any).is_ok());
    }

    #[test]
    fn rejects_duplicate_step_order_under_sequential_pathway() {
        let def = pathway(
            OrderMode::Sequential,
            vec![
                step(Some(2), OrderMode::AnyOrder, vec![task(None)]),
                step(Some(2), OrderMode::AnyOrder, vec![task(None)]),
            ],
        );
        assert!(matches!(
            PathwayModel::new(def).unwrap_err(),
            ValidationError::DuplicateOrder { order: 2, .. }
        ));
    }

    #[test]
    fn rejects_same_entity_twice_in_step() {
        let a = task(None);
        let mut b = task(None);
        b.entity = a.entity;
        let def = pathway(OrderMode::AnyOrder, vec![step(None, OrderMode::AnyOrder, vec![a, b])]);
        assert!(matches!(
            PathwayModel::new(def).unwrap_err(),
            ValidationError::DuplicateEntity { .. }
        ));
    }

    #[test]
    fn rejects_reused_task_id() {
        let a = task(None);
        let mut b = task(None);
        b.id = a.id;
        let def = pathway(OrderMode::AnyOrder, vec![step(None, OrderMode::AnyOrder, vec![a, b])]);
        assert!(matches!(
            PathwayModel::new(def).unwrap_err(),
            ValidationError::DuplicateId { .. }
        ));
    }

    #[test]
    fn order_display_is_contiguous_despite_gaps() {
        let t10 = task(Some(10));
        let t3 = task(Some(3));
        let unordered = task(None);
        let ids = (t3.id, t10.id, unordered.id);
        let def = pathway(
            OrderMode::Sequential,
            vec![step(Some(7), OrderMode::Sequential, vec![unordered, t10, t3])],
        );
        let model = PathwayModel::new(def).unwrap();
        let walked: Vec<_> = model
            .walk()
            .map(|(_, _, ti, t)| (ti, t.id, t.order_display))
            .collect();
        assert_eq!(walked, vec![(0, ids.0, 1), (1, ids.1, 2), (2, ids.2, 3)]);
        assert_eq!(model.steps()[0].order_display, 1);
    }

    #[test]
    fn version_ignores_names_but_tracks_structure() {
        let def = pathway(
            OrderMode::AnyOrder,
            vec![step(None, OrderMode::AnyOrder, vec![task(None), task(None)])],
        );
        let base = PathwayModel::new(def.clone()).unwrap();

        let mut renamed = def.clone();
        renamed.name = "renamed".into();
        renamed.steps[0].name = "first".into();
        assert_eq!(PathwayModel::new(renamed).unwrap().version(), base.version());

        let mut edited = def;
        edited.steps[0].rule = CompletionRule::Any;
        assert_ne!(PathwayModel::new(edited).unwrap().version(), base.version());
    }

    #[test]
    fn deserializes_through_validation() {
        let yaml = format!(
            r#"
id: {pid}
rule: All
order_mode: Sequential
steps:
  - id: {sid}
    rule: Any
    tasks:
      - id: {tid}
        entity: {{ entity_type: Opportunity, id: {oid} }}
"#,
            pid = uuid::Uuid::new_v4(),
            sid = uuid::Uuid::new_v4(),
            tid = uuid::Uuid::new_v4(),
            oid = uuid::Uuid::new_v4(),
        );
        let model: PathwayModel = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(model.task_count(), 1);
        assert_eq!(model.order_mode(), OrderMode::Sequential);

        let empty = format!("id: {}\nrule: All\nsteps: []\n", uuid::Uuid::new_v4());
        assert!(serde_yaml::from_str::<PathwayModel>(&empty).is_err());
    }
}
