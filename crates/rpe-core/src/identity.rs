//! # Identity Newtypes
//!
//! Identifier newtypes for every record the engine touches. Each is a
//! distinct type over a UUID, so a `LinkId` cannot be passed where a
//! `UsageId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }
    };
}

uuid_id!(
    /// A referral program.
    ProgramId,
    "program"
);
uuid_id!(
    /// A program's pathway definition.
    PathwayId,
    "pathway"
);
uuid_id!(
    /// A step within a pathway.
    StepId,
    "step"
);
uuid_id!(
    /// A task within a pathway step.
    TaskId,
    "task"
);
uuid_id!(
    /// A referral link owned by a referrer.
    LinkId,
    "link"
);
uuid_id!(
    /// One referee's claim of a referral link.
    UsageId,
    "usage"
);
uuid_id!(
    /// A platform user (referrer or referee).
    UserId,
    "user"
);
uuid_id!(
    /// An external opportunity referenced by a pathway task.
    OpportunityId,
    "opportunity"
);
uuid_id!(
    /// A referrer block record.
    BlockId,
    "block"
);
