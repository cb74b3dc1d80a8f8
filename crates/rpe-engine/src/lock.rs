//! Per-usage mutual exclusion.
//!
//! Evaluating a usage, and every cascade that mutates one, runs while
//! holding that usage's lock. Acquisition is bounded by a timeout and a
//! timeout surfaces as [`EngineError::LockTimeout`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rpe_core::UsageId;

use crate::error::EngineError;

#[derive(Debug, Default)]
pub struct UsageLocks {
    slots: Mutex<HashMap<UsageId, Arc<Mutex<()>>>>,
}

impl UsageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `usage`.
    pub fn with_lock<R>(
        &self,
        usage: UsageId,
        timeout: Duration,
        f: impl FnOnce() -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let slot = Arc::clone(self.slots.lock().entry(usage).or_default());
        let result = match slot.try_lock_for(timeout) {
            Some(_guard) => f(),
            None => {
                metrics::counter!("rpe_lock_timeout_total").increment(1);
                tracing::warn!(usage_id = %usage, timeout_ms = timeout.as_millis() as u64, "usage lock timed out");
                Err(EngineError::LockTimeout {
                    usage,
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        };
        self.release(usage, slot);
        result
    }

    /// Number of usages with a live lock slot.
    pub fn held(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, usage: UsageId, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock();
        // Only the map and this caller still reference the slot.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&usage);
        }
    }
}
