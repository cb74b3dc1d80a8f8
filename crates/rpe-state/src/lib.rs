//! # rpe-state — Lifecycle State Machines
//!
//! - **Program** ([`program`]): `Active`, `Inactive`, `Expired`,
//!   `LimitReached`, `UnCompletable`, `Deleted`, plus the admin-time
//!   configuration validator.
//! - **Referral link** ([`link`]): `Active → Cancelled | LimitReached | Expired`.
//! - **Link usage** ([`usage`]): `Pending → Completed | Expired`. Both
//!   outcomes are terminal; a settled usage is immutable.
//!
//! Every machine rejects transitions not in its table with a structured
//! [`StateError`]. Nothing here takes locks or reads the clock; callers
//! pass `now` explicitly.

pub mod error;
pub mod link;
pub mod program;
pub mod usage;

pub use error::StateError;
pub use link::{LinkStatus, ReferralLink};
pub use program::{Program, ProgramStatus, ProgramValidationError};
pub use usage::{
    Eligibility, ExpiryReason, PendingReason, ProofOfPersonhoodMethod, ReferralLinkUsage,
    RewardAmounts, TransitionRecord, UsageStatus,
};
