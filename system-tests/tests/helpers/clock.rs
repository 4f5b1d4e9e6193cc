//! A clock that only ever moves when a test tells it to.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use fleetgraph_core::clock::Clock;
use fleetgraph_core::clock::Timestamp;
use time::Duration;
use time::OffsetDateTime;

/// Starting instant for every fixed clock, chosen arbitrarily but kept
/// constant so test assertions never depend on wall-clock time.
const EPOCH_UNIX_SECONDS: i64 = 1_700_000_000;

/// A [`Clock`] whose reading is test-controlled. Unlike the fixed clocks
/// scattered across the other crates' own unit test modules, this one can
/// be advanced mid-test via [`FixedClock::advance`], which system tests
/// need to exercise lease expiry and reservation TTLs without sleeping.
pub struct FixedClock {
    offset_seconds: AtomicI64,
}

impl FixedClock {
    /// Builds a clock reading [`EPOCH_UNIX_SECONDS`].
    #[must_use]
    pub fn new() -> Self {
        Self { offset_seconds: AtomicI64::new(0) }
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.offset_seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        let offset = self.offset_seconds.load(Ordering::SeqCst);
        let base = OffsetDateTime::from_unix_timestamp(EPOCH_UNIX_SECONDS).expect("valid unix time");
        Timestamp::new(base + Duration::seconds(offset))
    }
}
