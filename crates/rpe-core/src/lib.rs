//! # rpe-core — Foundational Types for the Referral Pathway Engine
//!
//! Every other crate in the workspace depends on `rpe-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ProgramId`, `LinkId`, `UsageId`,
//!    `UserId`, `OpportunityId` and friends are distinct types. A link id can
//!    never be passed where a usage id is expected.
//!
//! 2. **UTC-only timestamps.** `Timestamp` is UTC with seconds precision.
//!    Wall-clock access goes through the [`Clock`] trait so that expiry and
//!    sweeper deadlines are testable with a [`ManualClock`].
//!
//! 3. **Content-addressed pathway versions.** `CanonicalBytes` is the only
//!    input accepted by [`sha256_digest()`], so a pathway version digest is
//!    always computed over the JCS form of the structure.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `rpe-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod temporal;

pub use canonical::CanonicalBytes;
pub use digest::{sha256_digest, ContentDigest};
pub use error::{CanonicalizationError, RpeError};
pub use identity::{
    BlockId, LinkId, OpportunityId, PathwayId, ProgramId, StepId, TaskId, UsageId, UserId,
};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
