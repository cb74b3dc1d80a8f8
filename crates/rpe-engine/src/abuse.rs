//! # Referrer Blocks
//!
//! A user has at most one active [`Block`]. While it is active the
//! [`ReferralAbuseGate`] vetoes every claim, link creation and pending
//! completion that credits that user as referrer. Completed usages are
//! never touched.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rpe_core::{BlockId, Timestamp, UserId};
use rpe_state::PendingReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub user_id: UserId,
    pub reason: String,
    pub comment_block: Option<String>,
    pub comment_unblock: Option<String>,
    /// Whether the user's Active links were cancelled when blocking.
    pub cancel_links: bool,
    pub active: bool,
    pub date_created: Timestamp,
    pub date_modified: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub user_id: UserId,
    pub reason: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub cancel_links: bool,
}

/// Lookup and mutation of block records.
pub trait BlockRegistry: Send + Sync + fmt::Debug {
    fn active_block(&self, user: UserId) -> Option<Block>;

    /// Block `request.user_id`. An existing active block is returned
    /// unchanged; the flag tells whether a new block was created.
    fn block(&self, request: &BlockRequest, now: Timestamp) -> (Block, bool);

    /// Deactivate the user's active block, if any, and return it.
    fn unblock(&self, user: UserId, comment: Option<String>, now: Timestamp) -> Option<Block>;
}

/// Block records held in memory. Deactivated blocks are kept as history.
#[derive(Debug, Default)]
pub struct InMemoryBlockRegistry {
    blocks: RwLock<HashMap<UserId, Vec<Block>>>,
}

impl InMemoryBlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, user: UserId) -> Vec<Block> {
        self.blocks.read().get(&user).cloned().unwrap_or_default()
    }
}

impl BlockRegistry for InMemoryBlockRegistry {
    fn active_block(&self, user: UserId) -> Option<Block> {
        self.blocks
            .read()
            .get(&user)
            .and_then(|history| history.iter().find(|b| b.active).cloned())
    }

    fn block(&self, request: &BlockRequest, now: Timestamp) -> (Block, bool) {
        let mut blocks = self.blocks.write();
        let history = blocks.entry(request.user_id).or_default();
        if let Some(existing) = history.iter().find(|b| b.active) {
            return (existing.clone(), false);
        }
        let block = Block {
            id: BlockId::new(),
            user_id: request.user_id,
            reason: request.reason.clone(),
            comment_block: request.comment.clone(),
            comment_unblock: None,
            cancel_links: request.cancel_links,
            active: true,
            date_created: now,
            date_modified: now,
        };
        history.push(block.clone());
        (block, true)
    }

    fn unblock(&self, user: UserId, comment: Option<String>, now: Timestamp) -> Option<Block> {
        let mut blocks = self.blocks.write();
        let block = blocks.get_mut(&user)?.iter_mut().find(|b| b.active)?;
        block.active = false;
        block.comment_unblock = comment;
        block.date_modified = now;
        Some(block.clone())
    }
}

/// Vetoes referral activity credited to a blocked referrer.
#[derive(Debug, Clone, Copy)]
pub struct ReferralAbuseGate<'a> {
    registry: &'a dyn BlockRegistry,
}

impl<'a> ReferralAbuseGate<'a> {
    pub fn new(registry: &'a dyn BlockRegistry) -> Self {
        Self { registry }
    }

    pub fn is_blocked(&self, referrer: UserId) -> bool {
        self.registry.active_block(referrer).is_some()
    }

    pub fn check(&self, referrer: UserId) -> Result<(), PendingReason> {
        match self.registry.active_block(referrer) {
            Some(block) => {
                tracing::info!(
                    referrer_id = %referrer,
                    block_id = %block.id,
                    reason = %block.reason,
                    "referrer blocked, vetoing"
                );
                Err(PendingReason::ReferrerBlocked)
            }
            None => Ok(()),
        }
    }
}
