//! # Program Capacity Guard
//!
//! Runs before the usage state machine. A usage may only move towards
//! completion when its referrer is not blocked, its program and link are
//! both Active, and the ledger still has room under both caps. Anything
//! else keeps the usage Pending with the first failing reason.
//!
//! A LimitReached program or link reports `CapacityExceeded`, the same
//! reason the ledger gives once a cap is hit.

use rpe_ledger::ClaimLedger;
use rpe_state::{LinkStatus, PendingReason, Program, ProgramStatus, ReferralLink};

use crate::abuse::ReferralAbuseGate;

#[derive(Debug, Clone, Copy)]
pub struct ProgramCapacityGuard<'a> {
    ledger: &'a ClaimLedger,
    abuse: ReferralAbuseGate<'a>,
}

impl<'a> ProgramCapacityGuard<'a> {
    pub fn new(ledger: &'a ClaimLedger, abuse: ReferralAbuseGate<'a>) -> Self {
        Self { ledger, abuse }
    }

    pub fn check(&self, program: &Program, link: &ReferralLink) -> Result<(), PendingReason> {
        self.abuse.check(link.user_id)?;

        match program.status() {
            ProgramStatus::Active => {}
            ProgramStatus::LimitReached => return Err(PendingReason::CapacityExceeded),
            status => return Err(PendingReason::ProgramNotActive { status }),
        }
        if link.program_id != program.id {
            tracing::error!(
                link_id = %link.id,
                link_program = %link.program_id,
                program_id = %program.id,
                "link belongs to a different program"
            );
            return Err(PendingReason::LinkNotActive {
                status: link.status(),
            });
        }
        match link.status() {
            LinkStatus::Active => {}
            LinkStatus::LimitReached => return Err(PendingReason::CapacityExceeded),
            status => return Err(PendingReason::LinkNotActive { status }),
        }
        if !self.ledger.has_completion_capacity(program, link.id) {
            return Err(PendingReason::CapacityExceeded);
        }
        Ok(())
    }
}
