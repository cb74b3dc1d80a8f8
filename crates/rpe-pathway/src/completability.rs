//! Structural satisfiability: could *anyone* still complete this pathway,
//! given which referenced entities remain completable?

use serde::{Deserialize, Serialize};

use crate::model::{CompletionRule, EntityRef, PathwayModel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completability {
    Completable,
    /// Every reason names a step or task that can no longer be satisfied.
    Uncompletable { reasons: Vec<String> },
}

impl Completability {
    pub fn is_completable(&self) -> bool {
        matches!(self, Self::Completable)
    }
}

/// Check `model` against an entity-level predicate.
pub fn check_completable(
    model: &PathwayModel,
    is_entity_completable: impl Fn(&EntityRef) -> bool,
) -> Completability {
    let mut reasons = Vec::new();
    let mut step_ok = Vec::with_capacity(model.steps().len());

    for step in model.steps() {
        let mut dead = Vec::new();
        for task in &step.tasks {
            if !is_entity_completable(&task.entity) {
                dead.push(format!(
                    "step {} task {}: {} is no longer completable",
                    step.order_display, task.order_display, task.entity
                ));
            }
        }
        let ok = match step.rule {
            CompletionRule::All => dead.is_empty(),
            CompletionRule::Any => dead.len() < step.tasks.len(),
        };
        if !ok {
            reasons.append(&mut dead);
        }
        step_ok.push(ok);
    }

    let ok = match model.rule() {
        CompletionRule::All => step_ok.iter().all(|ok| *ok),
        CompletionRule::Any => step_ok.iter().any(|ok| *ok),
    };
    if ok {
        Completability::Completable
    } else {
        Completability::Uncompletable { reasons }
    }
}
