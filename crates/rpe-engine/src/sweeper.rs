//! # Background Sweeper
//!
//! Re-evaluates pending usages that need it: those whose completion window
//! or program end has passed, and those flagged dirty by a fact change or
//! a failed earlier evaluation. Work is fetched in bounded batches until a
//! batch comes back empty or the run's deadline passes. A failure on one
//! usage is logged and the batch carries on.
//!
//! [`BackgroundSweeper`] drives one run per tick on a tokio interval: the
//! program expiration job, then the health probe, then the usage sweep,
//! all sharing one deadline.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use rpe_core::{Timestamp, UsageId};
use rpe_state::ReferralLinkUsage;

use crate::engine::ReferralEngine;
use crate::health::HealthReport;
use crate::pipeline::EvaluationOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub batches: usize,
    pub evaluated: usize,
    pub completed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub failed: usize,
    pub deadline_reached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepCycle {
    pub programs_expired: usize,
    pub health: HealthReport,
    pub usages: SweepReport,
}

impl ReferralEngine {
    /// Sweep pending usages until none are due or `deadline` passes.
    pub fn sweep_usages(&self, deadline: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        let mut seen: HashSet<UsageId> = HashSet::new();

        loop {
            let now = self.now();
            if now >= deadline {
                report.deadline_reached = true;
                break;
            }
            let mut batch = self
                .usages
                .filter(|u| !seen.contains(&u.id) && self.is_due(u, now));
            if batch.is_empty() {
                break;
            }
            batch.sort_by_key(|u| (u.date_claimed, u.id));
            batch.truncate(self.config.sweep_batch_size);
            report.batches += 1;

            for usage in &batch {
                seen.insert(usage.id);
                report.evaluated += 1;
                match self.evaluate_usage(usage.id) {
                    Ok(EvaluationOutcome::Completed { .. }) => report.completed += 1,
                    Ok(EvaluationOutcome::Expired(_)) => report.expired += 1,
                    Ok(EvaluationOutcome::Pending(_)) => report.still_pending += 1,
                    Ok(EvaluationOutcome::Unchanged(_)) => {}
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(usage_id = %usage.id, error = %err, "sweep evaluation failed");
                    }
                }
            }
        }

        if report.evaluated > 0 {
            tracing::info!(
                batches = report.batches,
                evaluated = report.evaluated,
                completed = report.completed,
                expired = report.expired,
                failed = report.failed,
                deadline_reached = report.deadline_reached,
                "usage sweep finished"
            );
        }
        report
    }

    fn is_due(&self, usage: &ReferralLinkUsage, now: Timestamp) -> bool {
        if usage.is_terminal() {
            return false;
        }
        if usage.needs_evaluation() {
            return true;
        }
        self.programs
            .get(&usage.program_id)
            .is_some_and(|program| usage.expiry_due(&program, now).is_some())
    }
}

/// Runs sweep cycles on a fixed interval.
#[derive(Debug, Clone)]
pub struct BackgroundSweeper {
    engine: Arc<ReferralEngine>,
}

impl BackgroundSweeper {
    pub fn new(engine: Arc<ReferralEngine>) -> Self {
        Self { engine }
    }

    /// One full cycle bounded by `sweep_max_run_secs`.
    pub fn run_once(&self) -> SweepCycle {
        let deadline = self.engine.now().add(self.engine.config.sweep_max_run());
        let programs_expired = self.engine.expire_programs(deadline);
        let health = self.engine.probe_program_health(deadline);
        let usages = self.engine.sweep_usages(deadline);
        SweepCycle {
            programs_expired,
            health,
            usages,
        }
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    /// Each cycle runs on the blocking pool.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.engine.config.sweep_interval());
        tracing::info!(
            interval_secs = self.engine.config.sweep_interval_secs,
            "background sweeper started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sweeper = self.clone();
                    if let Err(err) = tokio::task::spawn_blocking(move || sweeper.run_once()).await {
                        tracing::error!(error = %err, "sweep cycle panicked");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("background sweeper stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
