//! # rpe-ledger — Claim Ledger and Reward Settlement
//!
//! The ledger owns every shared counter in the engine: completions per
//! program and per link, and reward cumulative per program and per link.
//! Its two mutation points, [`ClaimLedger::try_reserve_completion_slot`]
//! and [`ClaimLedger::try_reserve_reward_budget`], are single
//! check-and-increment operations under one lock, so concurrent claims
//! can never over-count a cap or overdraw a pool.
//!
//! [`RewardSettlement`] turns a reserved completion slot into fixed reward
//! amounts under a [`PayoutPolicy`].

pub mod ledger;
pub mod settlement;

pub use ledger::{ClaimLedger, LinkTotals, ProgramTotals, SlotReservation};
pub use settlement::{PayoutPolicy, RewardSettlement, SettlementOutcome};
