// crates/fleetgraph-core/src/clock.rs
// ============================================================================
// Module: Fleetgraph Clock
// Description: Injected wall-clock access for lease expiry and event stamps.
// Purpose: Keep every timestamp explicit and testable; no ambient SystemTime.
// Dependencies: time
// ============================================================================

//! ## Overview
//! No code under `runtime` reads the wall clock directly. Every operation
//! that needs "now" receives a `&dyn Clock`, the same way every other
//! collaborator is passed in as an explicit trait object. This keeps
//! lease-expiry and replay tests deterministic without faking global state.

use std::ops::Add;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

/// A UTC instant, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Wraps a raw `OffsetDateTime`, normalizing it to UTC.
    #[must_use]
    pub fn new(at: OffsetDateTime) -> Self {
        Self(at.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the underlying `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the number of whole seconds between `self` and `other`.
    #[must_use]
    pub fn seconds_since(&self, other: Self) -> i64 {
        (self.0 - other.0).whole_seconds()
    }

    /// Returns true if `self` is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::new(self.0 + rhs)
    }
}

/// Injected source of the current time.
///
/// Background tasks (the lease/reservation sweeper, the metrics runner)
/// take a `&dyn Clock` as an explicit parameter rather than calling
/// `OffsetDateTime::now_utc()` themselves, so tests can supply a fixed or
/// stepped clock.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// A `Clock` backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;
    use super::SystemClock;
    use super::Timestamp;
    use time::Duration;

    /// A clock that always returns the same instant, for deterministic tests.
    pub struct FixedClock(pub Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(first.seconds_since(second) <= 0);
    }

    #[test]
    fn addition_moves_forward() {
        let now = SystemClock.now();
        let later = now + Duration::minutes(5);
        assert!(now.is_before(later));
    }
}
