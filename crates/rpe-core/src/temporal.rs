//! # Temporal Types
//!
//! UTC-only timestamps with second-level precision, and the [`Clock`]
//! abstraction every time-dependent decision reads from.
//!
//! Link expiry, the claim onboarding window and the sweeper's run deadline
//! all compare against "now". Reading that through a trait object lets tests
//! pin and advance time deterministically with [`ManualClock`].

use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::RpeError;

/// A UTC timestamp with second-level precision.
///
/// Serializes to ISO 8601 with a `Z` suffix (e.g. `2026-01-15T12:00:00Z`).
/// Subsecond precision is truncated on construction so that comparisons
/// and pathway digests are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current UTC time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap a `chrono::DateTime<Utc>`, truncating to seconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(0))
    }

    /// Parse an RFC 3339 string, normalizing to UTC.
    pub fn parse(s: &str) -> Result<Self, RpeError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| RpeError::InvalidTimestamp {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// Access the underlying `chrono::DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Shift by a signed duration. Saturates at the representable bounds.
    pub fn add(&self, delta: Duration) -> Self {
        let shifted = self.0.checked_add_signed(delta).unwrap_or(if delta < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self::from_datetime(shifted)
    }

    pub fn add_days(&self, days: i64) -> Self {
        self.add(Duration::days(days))
    }

    pub fn add_minutes(&self, minutes: i64) -> Self {
        self.add(Duration::minutes(minutes))
    }

    pub fn add_seconds(&self, seconds: i64) -> Self {
        self.add(Duration::seconds(seconds))
    }

    /// Signed elapsed time from `earlier` to `self`.
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        self.0.signed_duration_since(earlier.0)
    }

    /// Return the timestamp as an ISO 8601 string with Z suffix.
    pub fn to_canonical_string(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for negative deltas).
    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.lock();
        *current = current.add(delta);
    }

    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }

    pub fn set(&self, at: Timestamp) {
        *self.current.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}
