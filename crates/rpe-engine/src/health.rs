//! # Program Health
//!
//! Two deadline-bounded batch jobs over programs:
//!
//! - [`ReferralEngine::probe_program_health`] moves programs between
//!   Active and UnCompletable as the entities their pathway references
//!   stop or start being completable, and expires programs that stay
//!   UnCompletable past the grace period.
//! - [`ReferralEngine::expire_programs`] expires Active and UnCompletable
//!   programs whose end date has passed.
//!
//! Both fetch batches of at most `sweep_batch_size` programs, oldest
//! modification first, and stop when a batch comes back empty or the
//! deadline passes.

use std::collections::HashSet;

use serde::Serialize;

use rpe_core::{ProgramId, Timestamp};
use rpe_pathway::check_completable;
use rpe_state::{Program, ProgramStatus};

use crate::engine::ReferralEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub examined: usize,
    pub marked_uncompletable: usize,
    pub restored: usize,
    pub limit_reached: usize,
    pub expired: usize,
    pub failed: usize,
    pub deadline_reached: bool,
}

impl ReferralEngine {
    pub fn probe_program_health(&self, deadline: Timestamp) -> HealthReport {
        let mut report = HealthReport::default();
        let grace = chrono::Duration::days(i64::from(self.config.uncompletable_grace_days));

        let mut seen = HashSet::new();
        let deadline_reached = self.for_each_program_batch(
            deadline,
            &mut seen,
            |p| {
                p.pathway.is_some()
                    && matches!(
                        p.status(),
                        ProgramStatus::Active | ProgramStatus::UnCompletable
                    )
            },
            |program| {
                report.examined += 1;
                if let Err(err) = self.probe_one(program, grace, &mut report) {
                    report.failed += 1;
                    tracing::warn!(program_id = %program.id, error = %err, "health probe failed");
                }
            },
        );
        report.deadline_reached = deadline_reached;
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                uncompletable = report.marked_uncompletable,
                restored = report.restored,
                expired = report.expired,
                "program health probed"
            );
        }
        report
    }

    /// Expire programs past their end date. Returns how many expired.
    pub fn expire_programs(&self, deadline: Timestamp) -> usize {
        let now = self.now();
        let mut expired = 0;
        let mut seen = HashSet::new();
        self.for_each_program_batch(
            deadline,
            &mut seen,
            |p| {
                matches!(
                    p.status(),
                    ProgramStatus::Active | ProgramStatus::UnCompletable
                ) && p.is_past_end(now)
            },
            |program| match self.expire_program(program.id) {
                Ok(()) => expired += 1,
                Err(err) => {
                    tracing::warn!(program_id = %program.id, error = %err, "program expiration failed")
                }
            },
        );
        expired
    }

    fn probe_one(
        &self,
        program: &Program,
        grace: chrono::Duration,
        report: &mut HealthReport,
    ) -> Result<(), crate::EngineError> {
        let Some(pathway) = &program.pathway else {
            return Ok(());
        };
        let now = self.now();
        let completability = check_completable(pathway, |e| self.facts.is_entity_completable(e));

        match (program.status(), completability.is_completable()) {
            (ProgramStatus::Active, false) => {
                tracing::warn!(
                    program_id = %program.id,
                    reasons = ?completability,
                    "pathway no longer completable"
                );
                self.transition_program(program.id, ProgramStatus::UnCompletable)?;
                report.marked_uncompletable += 1;
            }
            (ProgramStatus::UnCompletable, true) => {
                if program.is_past_end(now) {
                    self.expire_program(program.id)?;
                    report.expired += 1;
                } else if program.completion_limit.is_some_and(|limit| {
                    self.ledger.program_totals(program).completion_total >= limit
                }) {
                    self.program_limit_reached(program.id);
                    report.limit_reached += 1;
                } else {
                    self.transition_program(program.id, ProgramStatus::Active)?;
                    report.restored += 1;
                }
            }
            (ProgramStatus::UnCompletable, false) => {
                if program.date_modified.add(grace) <= now {
                    self.expire_program(program.id)?;
                    report.expired += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Run `visit` over matching programs in batches until none remain or
    /// `deadline` passes. Returns whether the deadline cut the run short.
    fn for_each_program_batch(
        &self,
        deadline: Timestamp,
        seen: &mut HashSet<ProgramId>,
        pred: impl Fn(&Program) -> bool,
        mut visit: impl FnMut(&Program),
    ) -> bool {
        loop {
            if self.now() >= deadline {
                return true;
            }
            let mut batch = self.programs.filter(|p| !seen.contains(&p.id) && pred(p));
            if batch.is_empty() {
                return false;
            }
            batch.sort_by_key(|p| (p.date_modified, p.id));
            batch.truncate(self.config.sweep_batch_size);
            for program in &batch {
                seen.insert(program.id);
                visit(program);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{opportunity, pathway, start, Harness};
    use crate::EngineConfig;
    use rpe_core::UserId;
    use rpe_state::{LinkStatus, UsageStatus};

    fn far() -> Timestamp {
        start().add_days(365)
    }

    #[test]
    fn retired_entity_marks_program_uncompletable_then_restores() {
        let h = Harness::new();
        let task = opportunity();
        let program = h.program(Program::new("p", start()).with_pathway(pathway(&[task])));

        h.facts.retire(task);
        let report = h.engine.probe_program_health(far());
        assert_eq!(report.marked_uncompletable, 1);
        assert_eq!(
            h.engine.program(program).unwrap().status(),
            ProgramStatus::UnCompletable
        );

        h.facts.restore(&task);
        let report = h.engine.probe_program_health(far());
        assert_eq!(report.restored, 1);
        assert_eq!(h.engine.program(program).unwrap().status(), ProgramStatus::Active);
    }

    #[test]
    fn restored_program_at_cap_goes_to_limit_reached() {
        let h = Harness::new();
        let task = opportunity();
        let program =
            h.program(Program::new("p", start()).with_completion_limit(1).with_pathway(pathway(&[task])));
        let link = h.link(program, UserId::new());
        h.facts.retire(task);
        h.engine.probe_program_health(far());
        h.engine.ledger().restore_program(program, 1, 0);
        h.facts.restore(&task);

        let report = h.engine.probe_program_health(far());
        assert_eq!(report.limit_reached, 1);
        assert_eq!(
            h.engine.program(program).unwrap().status(),
            ProgramStatus::LimitReached
        );
        assert_eq!(h.engine.link(link.id).unwrap().status(), LinkStatus::LimitReached);
    }

    #[test]
    fn uncompletable_past_grace_expires() {
        let h = Harness::with_config(EngineConfig {
            uncompletable_grace_days: 14,
            ..EngineConfig::default()
        });
        let task = opportunity();
        let program = h.program(Program::new("p", start()).with_pathway(pathway(&[task])));
        let link = h.link(program, UserId::new());
        let usage = h.claim(link.id).unwrap();
        h.facts.retire(task);
        h.engine.probe_program_health(far());

        h.clock.advance_days(13);
        assert_eq!(h.engine.probe_program_health(far()).expired, 0);
        h.clock.advance_days(1);
        assert_eq!(h.engine.probe_program_health(far()).expired, 1);
        assert_eq!(h.engine.program(program).unwrap().status(), ProgramStatus::Expired);
        assert_eq!(h.engine.usage(usage.id).unwrap().status(), UsageStatus::Expired);
    }

    #[test]
    fn ended_programs_expire() {
        let h = Harness::new();
        let ending = h.program(Program::new("ending", start()).with_date_end(start().add_days(2)));
        let open = h.program(Program::new("open", start()));
        h.clock.advance_days(3);
        assert_eq!(h.engine.expire_programs(far()), 1);
        assert_eq!(h.engine.program(ending).unwrap().status(), ProgramStatus::Expired);
        assert_eq!(h.engine.program(open).unwrap().status(), ProgramStatus::Active);
    }

    #[test]
    fn end_date_itself_is_still_live_everywhere() {
        let h = Harness::new();
        let task = opportunity();
        let end = start().add_days(2);
        let program = h.program(
            Program::new("ending", start())
                .with_date_end(end)
                .with_pathway(pathway(&[task])),
        );
        let link = h.link(program, UserId::new());
        h.clock.set(end);

        assert_eq!(h.engine.expire_programs(far()), 0);
        assert!(h.engine.create_link(program, UserId::new(), "late").is_ok());
        let usage = h.claim(link.id).unwrap();
        assert_eq!(
            h.engine.evaluate_usage(usage.id).unwrap(),
            crate::EvaluationOutcome::Pending(rpe_state::PendingReason::PathwayIncomplete {
                percent_complete: 0
            })
        );

        h.clock.advance(chrono::Duration::seconds(1));
        assert!(matches!(
            h.claim(link.id),
            Err(crate::EngineError::ClaimRejected(crate::ClaimRejection::ProgramEnded))
        ));
        assert_eq!(h.engine.expire_programs(far()), 1);
        assert_eq!(h.engine.usage(usage.id).unwrap().status(), UsageStatus::Expired);
    }

    #[test]
    fn past_deadline_does_nothing() {
        let h = Harness::new();
        let task = opportunity();
        h.program(Program::new("p", start()).with_pathway(pathway(&[task])));
        h.facts.retire(task);
        let report = h.engine.probe_program_health(h.engine.now());
        assert!(report.deadline_reached);
        assert_eq!(report.examined, 0);
    }

    #[test]
    fn batches_cover_every_program() {
        let h = Harness::with_config(EngineConfig {
            sweep_batch_size: 2,
            ..EngineConfig::default()
        });
        let task = opportunity();
        for i in 0..5 {
            h.program(Program::new(format!("p{i}"), start()).with_pathway(pathway(&[task])));
        }
        h.facts.retire(task);
        let report = h.engine.probe_program_health(far());
        assert_eq!(report.examined, 5);
        assert_eq!(report.marked_uncompletable, 5);
    }
}
