//! # Engine Events
//!
//! State transitions the engine publishes for an external notifier or
//! accounting system. The engine never formats user-facing messages.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use rpe_core::{LinkId, ProgramId, Timestamp, UsageId, UserId};
use rpe_state::{ExpiryReason, LinkStatus, ProgramStatus, RewardAmounts};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    UsageClaimed {
        usage_id: UsageId,
        program_id: ProgramId,
        link_id: LinkId,
        referee_id: UserId,
        at: Timestamp,
    },
    UsageCompleted {
        usage_id: UsageId,
        program_id: ProgramId,
        link_id: LinkId,
        rewards: RewardAmounts,
        at: Timestamp,
    },
    UsageExpired {
        usage_id: UsageId,
        program_id: ProgramId,
        reason: ExpiryReason,
        at: Timestamp,
    },
    /// The completion stands; rewards fell short and need reconciliation.
    RewardSettlementFailed {
        usage_id: UsageId,
        program_id: ProgramId,
        requested: RewardAmounts,
        paid: RewardAmounts,
        at: Timestamp,
    },
    LinkStatusChanged {
        link_id: LinkId,
        program_id: ProgramId,
        from: LinkStatus,
        to: LinkStatus,
        at: Timestamp,
    },
    ProgramStatusChanged {
        program_id: ProgramId,
        from: ProgramStatus,
        to: ProgramStatus,
        at: Timestamp,
    },
    ReferrerBlocked {
        user_id: UserId,
        links_cancelled: usize,
        at: Timestamp,
    },
    ReferrerUnblocked {
        user_id: UserId,
        at: Timestamp,
    },
}

/// Receives every event the engine emits. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards events into a tokio unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped, discarding event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Drain and return everything recorded so far.
    pub fn take(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unblocked() -> EngineEvent {
        EngineEvent::ReferrerUnblocked {
            user_id: UserId::new(),
            at: Timestamp::parse("2026-01-01T00:00:00Z").unwrap(),
        }
    }

    #[test]
    fn events_are_tagged_by_type() {
        let json = serde_json::to_value(unblocked()).unwrap();
        assert_eq!(json["type"], "referrer_unblocked");
    }

    #[test]
    fn recording_sink_drains() {
        let sink = RecordingSink::new();
        sink.emit(unblocked());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let first = unblocked();
        sink.emit(first.clone());
        sink.emit(unblocked());
        assert_eq!(rx.recv().await, Some(first));
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(unblocked());
    }
}
