//! # Claim Ledger
//!
//! Per-program and per-link counters behind a single `parking_lot::Mutex`.
//! A completion slot touches both a program counter and a link counter, so
//! one lock over both maps keeps the check and the double increment a
//! single atomic step. Critical sections are a few integer comparisons;
//! the lock is never held across I/O or `.await`.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use rpe_core::{LinkId, ProgramId};
use rpe_state::{Program, RewardAmounts};

#[derive(Debug, Default, Clone, Copy)]
struct ProgramCounters {
    completion_total: u32,
    reward_cumulative: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LinkCounters {
    completion_total: u32,
    reward_cumulative: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    programs: HashMap<ProgramId, ProgramCounters>,
    links: HashMap<LinkId, LinkCounters>,
}

/// Proof that one completion was counted against a program and a link.
///
/// Only the ledger constructs these; reward settlement requires one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotReservation {
    program_id: ProgramId,
    link_id: LinkId,
    program_total: u32,
    link_total: u32,
    program_limit_reached: bool,
    link_limit_reached: bool,
}

impl SlotReservation {
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Program completions including this one.
    pub fn program_total(&self) -> u32 {
        self.program_total
    }

    /// Link completions including this one.
    pub fn link_total(&self) -> u32 {
        self.link_total
    }

    /// This reservation took the last program-wide slot.
    pub fn program_limit_reached(&self) -> bool {
        self.program_limit_reached
    }

    /// This reservation took the last per-link slot.
    pub fn link_limit_reached(&self) -> bool {
        self.link_limit_reached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramTotals {
    pub completion_total: u32,
    /// `None` when the program has no completion limit.
    pub completion_balance: Option<u32>,
    pub reward_cumulative: u64,
    /// `pool - cumulative`; `None` when the pool is unlimited.
    pub reward_balance: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTotals {
    pub completion_total: u32,
    /// `None` when the program has no per-link limit.
    pub completion_balance: Option<u32>,
    /// Referrer rewards earned through this link.
    pub reward_cumulative: u64,
}

#[derive(Debug, Default)]
pub struct ClaimLedger {
    state: Mutex<LedgerState>,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load persisted program counters.
    pub fn restore_program(&self, program: ProgramId, completion_total: u32, reward_cumulative: u64) {
        self.state.lock().programs.insert(
            program,
            ProgramCounters {
                completion_total,
                reward_cumulative,
            },
        );
    }

    /// Load persisted link counters.
    pub fn restore_link(&self, link: LinkId, completion_total: u32, reward_cumulative: u64) {
        self.state.lock().links.insert(
            link,
            LinkCounters {
                completion_total,
                reward_cumulative,
            },
        );
    }

    /// Atomically check both completion caps and, only if both have room,
    /// increment both counters.
    ///
    /// Returns `None` without side effects when either cap is reached.
    pub fn try_reserve_completion_slot(
        &self,
        program: &Program,
        link: LinkId,
    ) -> Option<SlotReservation> {
        let mut state = self.state.lock();
        let program_total = state
            .programs
            .get(&program.id)
            .map_or(0, |c| c.completion_total);
        let link_total = state.links.get(&link).map_or(0, |c| c.completion_total);

        if !has_room(program_total, program.completion_limit)
            || !has_room(link_total, program.completion_limit_referee)
        {
            tracing::debug!(
                program_id = %program.id,
                link_id = %link,
                program_total,
                link_total,
                "completion slot rejected: cap reached"
            );
            return None;
        }

        let program_total = program_total + 1;
        let link_total = link_total + 1;
        state.programs.entry(program.id).or_default().completion_total = program_total;
        state.links.entry(link).or_default().completion_total = link_total;

        Some(SlotReservation {
            program_id: program.id,
            link_id: link,
            program_total,
            link_total,
            program_limit_reached: program.completion_limit == Some(program_total),
            link_limit_reached: program.completion_limit_referee == Some(link_total),
        })
    }

    /// Read-only cap check, for claim intake. Not a reservation.
    pub fn has_completion_capacity(&self, program: &Program, link: LinkId) -> bool {
        let state = self.state.lock();
        let program_total = state
            .programs
            .get(&program.id)
            .map_or(0, |c| c.completion_total);
        let link_total = state.links.get(&link).map_or(0, |c| c.completion_total);
        has_room(program_total, program.completion_limit)
            && has_room(link_total, program.completion_limit_referee)
    }

    /// Atomically check `cumulative + rewards.total() <= pool` and, if it
    /// holds, add the total to the program's cumulative and the referrer
    /// share to the link's. An unlimited pool always succeeds. A refusal
    /// changes nothing.
    pub fn try_reserve_reward_budget(
        &self,
        program: &Program,
        link: LinkId,
        rewards: RewardAmounts,
    ) -> bool {
        let mut state = self.state.lock();
        reserve_reward_locked(&mut *state, program, link, rewards)
    }

    /// Partial settlement under the ledger lock.
    ///
    /// `decide` receives the program's remaining balance (`None` when the
    /// pool is unlimited) and returns the amounts to pay, which are then
    /// reserved exactly as [`try_reserve_reward_budget`](Self::try_reserve_reward_budget)
    /// would. A decision that would overdraw the pool pays nothing.
    pub(crate) fn settle_with(
        &self,
        program: &Program,
        link: LinkId,
        decide: impl FnOnce(Option<u64>) -> RewardAmounts,
    ) -> RewardAmounts {
        let mut state = self.state.lock();
        let cumulative = state
            .programs
            .get(&program.id)
            .map_or(0, |c| c.reward_cumulative);
        let balance = program
            .reward_pool
            .map(|pool| pool.saturating_sub(cumulative));
        let granted = decide(balance);
        if reserve_reward_locked(&mut *state, program, link, granted) {
            granted
        } else {
            RewardAmounts::default()
        }
    }

    pub fn program_totals(&self, program: &Program) -> ProgramTotals {
        let counters = self
            .state
            .lock()
            .programs
            .get(&program.id)
            .copied()
            .unwrap_or_default();
        ProgramTotals {
            completion_total: counters.completion_total,
            completion_balance: program
                .completion_limit
                .map(|l| l.saturating_sub(counters.completion_total)),
            reward_cumulative: counters.reward_cumulative,
            reward_balance: program
                .reward_pool
                .map(|p| p.saturating_sub(counters.reward_cumulative)),
        }
    }

    pub fn link_totals(&self, program: &Program, link: LinkId) -> LinkTotals {
        let counters = self
            .state
            .lock()
            .links
            .get(&link)
            .copied()
            .unwrap_or_default();
        LinkTotals {
            completion_total: counters.completion_total,
            completion_balance: program
                .completion_limit_referee
                .map(|l| l.saturating_sub(counters.completion_total)),
            reward_cumulative: counters.reward_cumulative,
        }
    }
}

fn has_room(total: u32, limit: Option<u32>) -> bool {
    limit.map_or(true, |limit| total < limit)
}

fn reserve_reward_locked(
    state: &mut LedgerState,
    program: &Program,
    link: LinkId,
    rewards: RewardAmounts,
) -> bool {
    let counters = state.programs.entry(program.id).or_default();
    let Some(cumulative) = grant_within(counters.reward_cumulative, program.reward_pool, rewards.total())
    else {
        return false;
    };
    counters.reward_cumulative = cumulative;
    state.links.entry(link).or_default().reward_cumulative += rewards.referrer;
    true
}

/// New cumulative if `amount` fits in the pool.
fn grant_within(cumulative: u64, pool: Option<u64>, amount: u64) -> Option<u64> {
    let next = cumulative.checked_add(amount)?;
    match pool {
        Some(pool) if next > pool => None,
        _ => Some(next),
    }
}
