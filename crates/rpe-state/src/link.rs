//! # Referral Link Lifecycle
//!
//! `Active` is the only claimable state. `LimitReached` links can still be
//! expired when their program ends; `Cancelled` and `Expired` are terminal.

use serde::{Deserialize, Serialize};

use rpe_core::{LinkId, ProgramId, Timestamp, UserId};

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    Active,
    Cancelled,
    LimitReached,
    Expired,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::LimitReached => "LIMIT_REACHED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    pub fn can_transition_to(&self, to: LinkStatus) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Cancelled | Self::LimitReached | Self::Expired)
                | (Self::LimitReached, Self::Expired)
        )
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A referral link owned by one referrer within one program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralLink {
    pub id: LinkId,
    pub program_id: ProgramId,
    pub user_id: UserId,
    pub name: String,
    status: LinkStatus,
    pub date_created: Timestamp,
    pub date_modified: Timestamp,
}

impl ReferralLink {
    pub fn new(
        program_id: ProgramId,
        user_id: UserId,
        name: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: LinkId::new(),
            program_id,
            user_id,
            name: name.into(),
            status: LinkStatus::Active,
            date_created: now,
            date_modified: now,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn transition(&mut self, to: LinkStatus, now: Timestamp) -> Result<(), StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError::LinkTransition {
                link: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.date_modified = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_link_moves_once() {
        let now = Timestamp::parse("2026-01-01T00:00:00Z").unwrap();
        let mut link = ReferralLink::new(ProgramId::new(), UserId::new(), "mine", now);
        link.transition(LinkStatus::LimitReached, now).unwrap();
        link.transition(LinkStatus::Expired, now).unwrap();
        assert!(link.status().is_terminal());
        assert!(matches!(
            link.transition(LinkStatus::Active, now),
            Err(StateError::LinkTransition { .. })
        ));
    }

    #[test]
    fn cancel_only_from_active() {
        assert!(LinkStatus::Active.can_transition_to(LinkStatus::Cancelled));
        assert!(!LinkStatus::LimitReached.can_transition_to(LinkStatus::Cancelled));
        assert!(!LinkStatus::Expired.can_transition_to(LinkStatus::Cancelled));
    }
}
