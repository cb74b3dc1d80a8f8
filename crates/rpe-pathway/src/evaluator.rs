//! # Progress Evaluation
//!
//! [`evaluate()`] folds task facts bottom-up into a [`PathwayProgress`]
//! snapshot: task → step → pathway. It is a pure function of the model and
//! the provider's answers; it never reads the clock.
//!
//! ## Semantics
//!
//! - Task completion comes straight from the provider.
//! - Reachability: under `Sequential`, a child is reachable only when every
//!   preceding sibling (by `order_display`) is complete and its parent is
//!   reachable. Under `AnyOrder` children inherit the parent's reachability.
//! - Step `percent_complete` is `floor(completed / total * 100)`. Pathway
//!   `percent_complete` is the floor of the mean of step percentages, so a
//!   step with many tasks does not outweigh a step with one.
//! - `completed_at` is the max of contributing timestamps under `All` and the
//!   earliest completing child under `Any`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rpe_core::{PathwayId, StepId, TaskId, Timestamp};

use crate::facts::{FactError, TaskFactProvider};
use crate::model::{CompletionRule, EntityRef, OrderMode, PathwayModel, PathwayVersion};

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("fact lookup failed for task {task}: {source}")]
    Fact {
        task: TaskId,
        #[source]
        source: FactError,
    },

    /// A fact claims a completion time for an incomplete task.
    #[error("corrupt fact for task {task}: completed_at {completed_at} set on an incomplete task")]
    CorruptFact { task: TaskId, completed_at: Timestamp },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub entity: EntityRef,
    pub order_display: u32,
    pub completed: bool,
    pub completed_at: Option<Timestamp>,
    pub is_completable: bool,
    pub non_completable_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_id: StepId,
    pub order_display: u32,
    pub rule: CompletionRule,
    pub completed: bool,
    pub completed_at: Option<Timestamp>,
    pub percent_complete: u8,
    pub is_completable: bool,
    pub non_completable_reason: Option<String>,
    pub tasks: Vec<TaskProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathwayProgress {
    pub pathway_id: PathwayId,
    pub version: PathwayVersion,
    pub rule: CompletionRule,
    pub completed: bool,
    pub completed_at: Option<Timestamp>,
    pub percent_complete: u8,
    pub steps: Vec<StepProgress>,
}

impl PathwayProgress {
    pub fn task(&self, id: TaskId) -> Option<&TaskProgress> {
        self.steps
            .iter()
            .flat_map(|s| s.tasks.iter())
            .find(|t| t.task_id == id)
    }
}

/// Evaluate `model` against the facts supplied by `facts`.
pub fn evaluate<P>(model: &PathwayModel, facts: &P) -> Result<PathwayProgress, EvaluationError>
where
    P: TaskFactProvider + ?Sized,
{
    let mut steps = Vec::with_capacity(model.steps().len());
    // First incomplete step, which blocks every later step under Sequential.
    let mut step_blocker: Option<String> = None;

    for step in model.steps() {
        let step_reason = match model.order_mode() {
            OrderMode::Sequential => step_blocker.clone(),
            OrderMode::AnyOrder => None,
        };

        let mut tasks = Vec::with_capacity(step.tasks.len());
        let mut task_blocker: Option<String> = None;
        for task in &step.tasks {
            let fact = facts
                .task_fact(task)
                .map_err(|source| EvaluationError::Fact {
                    task: task.id,
                    source,
                })?;
            if let (false, Some(completed_at)) = (fact.completed, fact.completed_at) {
                return Err(EvaluationError::CorruptFact {
                    task: task.id,
                    completed_at,
                });
            }

            let reason = step_reason.clone().or_else(|| match step.order_mode {
                OrderMode::Sequential => task_blocker.clone(),
                OrderMode::AnyOrder => None,
            });
            if !fact.completed && task_blocker.is_none() {
                task_blocker = Some(format!(
                    "step {} task {} not yet completed",
                    step.order_display, task.order_display
                ));
            }

            tasks.push(TaskProgress {
                task_id: task.id,
                entity: task.entity,
                order_display: task.order_display,
                completed: fact.completed,
                completed_at: fact.completed_at,
                is_completable: reason.is_none(),
                non_completable_reason: reason,
            });
        }

        let done: Vec<(bool, Option<Timestamp>)> =
            tasks.iter().map(|t| (t.completed, t.completed_at)).collect();
        let (completed, completed_at) = fold_rule(step.rule, &done);
        let completed_count = done.iter().filter(|(c, _)| *c).count();
        let percent_complete = (completed_count * 100 / tasks.len().max(1)) as u8;

        if !completed && step_blocker.is_none() {
            step_blocker = Some(format!("step {} not yet completed", step.order_display));
        }

        steps.push(StepProgress {
            step_id: step.id,
            order_display: step.order_display,
            rule: step.rule,
            completed,
            completed_at,
            percent_complete,
            is_completable: step_reason.is_none(),
            non_completable_reason: step_reason,
            tasks,
        });
    }

    let done: Vec<(bool, Option<Timestamp>)> =
        steps.iter().map(|s| (s.completed, s.completed_at)).collect();
    let (completed, completed_at) = fold_rule(model.rule(), &done);
    let percent_sum: usize = steps.iter().map(|s| s.percent_complete as usize).sum();
    let percent_complete = (percent_sum / steps.len().max(1)) as u8;

    Ok(PathwayProgress {
        pathway_id: model.id(),
        version: model.version(),
        rule: model.rule(),
        completed,
        completed_at,
        percent_complete,
        steps,
    })
}

/// Combine child `(completed, completed_at)` pairs under a rule.
fn fold_rule(rule: CompletionRule, children: &[(bool, Option<Timestamp>)]) -> (bool, Option<Timestamp>) {
    match rule {
        CompletionRule::All => {
            let completed = !children.is_empty() && children.iter().all(|(c, _)| *c);
            let at = completed
                .then(|| children.iter().filter_map(|(_, at)| *at).max())
                .flatten();
            (completed, at)
        }
        CompletionRule::Any => {
            let completed = children.iter().any(|(c, _)| *c);
            let at = children
                .iter()
                .filter(|(c, _)| *c)
                .filter_map(|(_, at)| *at)
                .min();
            (completed, at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactTable, TaskFact};
    use crate::model::{PathwayDefinition, StepDefinition, TaskDefinition};
    use rpe_core::OpportunityId;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn opp() -> EntityRef {
        EntityRef::Opportunity(OpportunityId::new())
    }

    /// Build a model from `(rule, mode, entities)` per step.
    fn build(
        rule: CompletionRule,
        mode: OrderMode,
        steps: Vec<(CompletionRule, OrderMode, Vec<EntityRef>)>,
    ) -> PathwayModel {
        PathwayModel::new(PathwayDefinition {
            id: PathwayId::new(),
            name: String::new(),
            rule,
            order_mode: mode,
            steps: steps
                .into_iter()
                .map(|(rule, order_mode, entities)| StepDefinition {
                    id: StepId::new(),
                    name: String::new(),
                    rule,
                    order_mode,
                    order: None,
                    tasks: entities
                        .into_iter()
                        .map(|e| TaskDefinition {
                            id: TaskId::new(),
                            entity: Some(e),
                            order: None,
                        })
                        .collect(),
                })
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn single_sequential_step_half_done() {
        let (t1, t2) = (opp(), opp());
        let model = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![(CompletionRule::All, OrderMode::Sequential, vec![t1, t2])],
        );
        let facts = FactTable::new().with(t1, TaskFact::completed(ts("2026-01-02T00:00:00Z")));
        let progress = evaluate(&model, &facts).unwrap();

        let step = &progress.steps[0];
        assert_eq!(step.percent_complete, 50);
        assert!(!step.completed);
        assert!(!progress.completed);
        assert!(step.tasks[1].is_completable);
        assert_eq!(step.tasks[1].non_completable_reason, None);
    }

    #[test]
    fn sequential_blocks_after_first_gap() {
        let (a, b, c) = (opp(), opp(), opp());
        let model = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![(CompletionRule::All, OrderMode::Sequential, vec![a, b, c])],
        );
        // c done out of order: counts as completed, b blocks it.
        let facts = FactTable::new().with(c, TaskFact::completed(ts("2026-01-02T00:00:00Z")));
        let progress = evaluate(&model, &facts).unwrap();
        let tasks = &progress.steps[0].tasks;
        assert!(tasks[0].is_completable);
        assert!(!tasks[1].is_completable);
        assert_eq!(
            tasks[1].non_completable_reason.as_deref(),
            Some("step 1 task 1 not yet completed")
        );
        assert!(tasks[2].completed);
        assert!(!tasks[2].is_completable);
        assert_eq!(progress.steps[0].percent_complete, 33);
    }

    #[test]
    fn sequential_pathway_blocks_later_steps() {
        let (a, b) = (opp(), opp());
        let model = build(
            CompletionRule::All,
            OrderMode::Sequential,
            vec![
                (CompletionRule::All, OrderMode::AnyOrder, vec![a]),
                (CompletionRule::All, OrderMode::AnyOrder, vec![b]),
            ],
        );
        let progress = evaluate(&model, &FactTable::new()).unwrap();
        assert!(progress.steps[0].is_completable);
        let second = &progress.steps[1];
        assert!(!second.is_completable);
        assert_eq!(
            second.non_completable_reason.as_deref(),
            Some("step 1 not yet completed")
        );
        assert_eq!(
            second.tasks[0].non_completable_reason.as_deref(),
            Some("step 1 not yet completed")
        );
    }

    #[test]
    fn pathway_percent_is_mean_of_step_percents() {
        // Step 1: 1 of 1 (100). Step 2: 1 of 4 (25). Mean 62, flat count would be 40.
        let s1 = vec![opp()];
        let s2 = vec![opp(), opp(), opp(), opp()];
        let mut facts = FactTable::new();
        let at = ts("2026-01-02T00:00:00Z");
        facts.insert(s1[0], TaskFact::completed(at));
        facts.insert(s2[0], TaskFact::completed(at));
        let model = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![
                (CompletionRule::All, OrderMode::AnyOrder, s1),
                (CompletionRule::All, OrderMode::AnyOrder, s2),
            ],
        );
        let progress = evaluate(&model, &facts).unwrap();
        assert_eq!(progress.steps[0].percent_complete, 100);
        assert_eq!(progress.steps[1].percent_complete, 25);
        assert_eq!(progress.percent_complete, 62);
    }

    #[test]
    fn completed_at_is_max_for_all_and_first_for_any() {
        let (a, b) = (opp(), opp());
        let early = ts("2026-01-01T00:00:00Z");
        let late = ts("2026-01-05T00:00:00Z");
        let facts = FactTable::new()
            .with(a, TaskFact::completed(late))
            .with(b, TaskFact::completed(early));

        let all = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![(CompletionRule::All, OrderMode::AnyOrder, vec![a, b])],
        );
        let progress = evaluate(&all, &facts).unwrap();
        assert_eq!(progress.steps[0].completed_at, Some(late));
        assert_eq!(progress.completed_at, Some(late));

        let any = build(
            CompletionRule::Any,
            OrderMode::AnyOrder,
            vec![(CompletionRule::Any, OrderMode::AnyOrder, vec![a, b])],
        );
        let progress = evaluate(&any, &facts).unwrap();
        assert_eq!(progress.steps[0].completed_at, Some(early));
        assert_eq!(progress.completed_at, Some(early));
    }

    #[test]
    fn corrupt_fact_is_fatal() {
        let a = opp();
        let model = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![(CompletionRule::All, OrderMode::AnyOrder, vec![a])],
        );
        let facts = FactTable::new().with(
            a,
            TaskFact {
                completed: false,
                completed_at: Some(ts("2026-01-01T00:00:00Z")),
            },
        );
        assert!(matches!(
            evaluate(&model, &facts).unwrap_err(),
            EvaluationError::CorruptFact { .. }
        ));
    }

    #[test]
    fn provider_failure_surfaces_task() {
        let a = opp();
        let model = build(
            CompletionRule::All,
            OrderMode::AnyOrder,
            vec![(CompletionRule::All, OrderMode::AnyOrder, vec![a])],
        );
        let failing = |_: &crate::model::Task| -> Result<TaskFact, FactError> {
            Err(FactError::Unavailable {
                entity: a,
                detail: "timeout".into(),
            })
        };
        let err = evaluate(&model, &failing).unwrap_err();
        let task_id = model.steps()[0].tasks[0].id;
        assert!(matches!(err, EvaluationError::Fact { task, .. } if task == task_id));
    }

    #[test]
    fn exhaustive_two_by_two() {
        let rules = [CompletionRule::All, CompletionRule::Any];
        let at = ts("2026-01-01T00:00:00Z");
        for pathway_rule in rules {
            for step_rule in rules {
                let entities = [opp(), opp(), opp(), opp()];
                let model = build(
                    pathway_rule,
                    OrderMode::AnyOrder,
                    vec![
                        (step_rule, OrderMode::AnyOrder, entities[..2].to_vec()),
                        (step_rule, OrderMode::AnyOrder, entities[2..].to_vec()),
                    ],
                );
                for mask in 0u8..16 {
                    let mut facts = FactTable::new();
                    for (i, e) in entities.iter().enumerate() {
                        if mask & (1 << i) != 0 {
                            facts.insert(*e, TaskFact::completed(at));
                        }
                    }
                    let p = evaluate(&model, &facts).unwrap();
                    let step_done = |bits: u8| match step_rule {
                        CompletionRule::All => bits == 0b11,
                        CompletionRule::Any => bits != 0,
                    };
                    let s1 = step_done(mask & 0b11);
                    let s2 = step_done(mask >> 2);
                    assert_eq!(p.steps[0].completed, s1);
                    assert_eq!(p.steps[1].completed, s2);
                    let expected = match pathway_rule {
                        CompletionRule::All => s1 && s2,
                        CompletionRule::Any => s1 || s2,
                    };
                    assert_eq!(p.completed, expected, "mask {mask:04b}");
                }
            }
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_rule() -> impl Strategy<Value = CompletionRule> {
            prop_oneof![Just(CompletionRule::All), Just(CompletionRule::Any)]
        }

        fn arb_mode() -> impl Strategy<Value = OrderMode> {
            prop_oneof![Just(OrderMode::Sequential), Just(OrderMode::AnyOrder)]
        }

        /// `(rule, mode, per-task completed flags)` per step.
        fn arb_tree() -> impl Strategy<
            Value = (
                CompletionRule,
                OrderMode,
                Vec<(CompletionRule, OrderMode, Vec<bool>)>,
            ),
        > {
            (
                arb_rule(),
                arb_mode(),
                prop::collection::vec(
                    (arb_rule(), arb_mode(), prop::collection::vec(any::<bool>(), 1..5)),
                    1..5,
                ),
            )
        }

        fn materialize(
            tree: &(
                CompletionRule,
                OrderMode,
                Vec<(CompletionRule, OrderMode, Vec<bool>)>,
            ),
        ) -> (PathwayModel, FactTable) {
            let at = Timestamp::parse("2026-01-01T00:00:00Z").unwrap();
            let mut facts = FactTable::new();
            let steps = tree
                .2
                .iter()
                .map(|(rule, mode, flags)| {
                    let entities: Vec<EntityRef> = flags
                        .iter()
                        .map(|done| {
                            let e = opp();
                            if *done {
                                facts.insert(e, TaskFact::completed(at));
                            }
                            e
                        })
                        .collect();
                    (*rule, *mode, entities)
                })
                .collect();
            (build(tree.0, tree.1, steps), facts)
        }

        proptest! {
            #[test]
            fn rule_semantics_hold(tree in arb_tree()) {
                let (model, facts) = materialize(&tree);
                let p = evaluate(&model, &facts).unwrap();
                for step in &p.steps {
                    let expected = match step.rule {
                        CompletionRule::All => step.tasks.iter().all(|t| t.completed),
                        CompletionRule::Any => step.tasks.iter().any(|t| t.completed),
                    };
                    prop_assert_eq!(step.completed, expected);
                    prop_assert!(step.percent_complete <= 100);
                }
                let expected = match p.rule {
                    CompletionRule::All => p.steps.iter().all(|s| s.completed),
                    CompletionRule::Any => p.steps.iter().any(|s| s.completed),
                };
                prop_assert_eq!(p.completed, expected);
            }

            #[test]
            fn sequential_never_unlocks_past_a_gap(tree in arb_tree()) {
                let (model, facts) = materialize(&tree);
                let p = evaluate(&model, &facts).unwrap();
                for (step_def, step) in model.steps().iter().zip(&p.steps) {
                    if step_def.order_mode != OrderMode::Sequential {
                        continue;
                    }
                    for k in 1..step.tasks.len() {
                        if step.tasks[..k].iter().any(|t| !t.completed) {
                            prop_assert!(!step.tasks[k].is_completable);
                        }
                    }
                }
                if model.order_mode() == OrderMode::Sequential {
                    for k in 1..p.steps.len() {
                        if p.steps[..k].iter().any(|s| !s.completed) {
                            prop_assert!(!p.steps[k].is_completable);
                        }
                    }
                }
            }

            #[test]
            fn evaluation_is_deterministic(tree in arb_tree()) {
                let (model, facts) = materialize(&tree);
                prop_assert_eq!(evaluate(&model, &facts).unwrap(), evaluate(&model, &facts).unwrap());
            }
        }
    }
}
