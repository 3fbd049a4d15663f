//! Time source for lease arithmetic.
//!
//! Lease expiry and reopen times are wall-clock timestamps shared between
//! nodes through the store, so they come from a [`Clock`] rather than
//! `tokio::time`. Tests drive leases with [`ManualClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one copy to a
/// store and keep another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// `now + d`, saturating at the far end of the representable range.
pub fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether a lease or reopen timestamp has passed.
///
/// A timestamp equal to `now` counts as elapsed.
#[inline]
pub fn has_elapsed(at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_secs(61));

        assert_eq!(clock.now() - start, TimeDelta::seconds(61));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::new();
        let target = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            after(now, Duration::from_secs(10)) - now,
            TimeDelta::seconds(10)
        );
    }

    #[test]
    fn test_has_elapsed_boundary() {
        let now = Utc::now();
        assert!(has_elapsed(now, now));
        assert!(has_elapsed(now - TimeDelta::seconds(1), now));
        assert!(!has_elapsed(now + TimeDelta::milliseconds(1), now));
    }
}
