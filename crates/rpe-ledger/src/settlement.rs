//! # Reward Settlement
//!
//! Runs after a completion slot was reserved. Rewards are read from the
//! program's current rates and fixed on the outcome; the completion slot is
//! never rolled back when the pool cannot pay. A shortfall is reported as
//! `settlement_failed` for manual reconciliation.

use serde::{Deserialize, Serialize};

use rpe_state::{Program, RewardAmounts};

use crate::ledger::{ClaimLedger, SlotReservation};

/// How a limited pool pays a completion it cannot fully cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPolicy {
    /// Pay both rewards in full or pay nothing.
    #[default]
    AllOrNothing,
    /// Pay the referee first, then the referrer from what is left.
    RefereeFirstPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Amounts configured on the program at settlement time.
    pub requested: RewardAmounts,
    /// Amounts actually credited.
    pub paid: RewardAmounts,
    /// `paid` fell short of `requested`.
    pub settlement_failed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewardSettlement {
    policy: PayoutPolicy,
}

impl RewardSettlement {
    pub fn new(policy: PayoutPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PayoutPolicy {
        self.policy
    }

    /// Credit the program's rewards for one reserved completion.
    pub fn settle(
        &self,
        ledger: &ClaimLedger,
        program: &Program,
        slot: &SlotReservation,
    ) -> SettlementOutcome {
        let requested = RewardAmounts {
            referrer: program.reward_referrer.unwrap_or(0),
            referee: program.reward_referee.unwrap_or(0),
        };
        if requested.total() == 0 {
            return SettlementOutcome {
                requested,
                paid: requested,
                settlement_failed: false,
            };
        }

        let policy = self.policy;
        let paid = match policy {
            PayoutPolicy::AllOrNothing => {
                if ledger.try_reserve_reward_budget(program, slot.link_id(), requested) {
                    requested
                } else {
                    RewardAmounts::default()
                }
            }
            PayoutPolicy::RefereeFirstPartial => {
                ledger.settle_with(program, slot.link_id(), |balance| {
                    let Some(balance) = balance else {
                        return requested;
                    };
                    let referee = requested.referee.min(balance);
                    let referrer = requested.referrer.min(balance - referee);
                    RewardAmounts { referrer, referee }
                })
            }
        };

        let settlement_failed = paid != requested;
        if settlement_failed {
            tracing::warn!(
                program_id = %program.id,
                link_id = %slot.link_id(),
                requested = requested.total(),
                paid = paid.total(),
                policy = ?policy,
                "reward pool could not cover completion"
            );
        }
        SettlementOutcome {
            requested,
            paid,
            settlement_failed,
        }
    }
}
