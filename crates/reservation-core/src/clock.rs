//! Injectable time source.
//!
//! The orchestrator, scheduler, and executor never call `chrono::Utc::now()`
//! directly — they go through a [`Clock`] so tests can drive time
//! deterministically instead of racing the wall clock.

use chrono::{DateTime, Timelike, Utc};

/// A source of the current time.
///
/// Implementations must be cheap to call and safe to share across tasks.
pub trait Clock: Send + Sync + 'static {
    /// The current time, truncated to the minute — reservation dates never
    /// carry second/sub-second precision.
    fn now(&self) -> DateTime<Utc>;
}

/// The real, wall-clock time source. Used everywhere outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_minute(Utc::now())
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(t.time().hour(), t.time().minute(), 0)
        .map_or(t, |naive| naive.and_utc())
}

/// A manually-advanced clock for deterministic tests.
///
/// Starts at whatever instant the test supplies and only moves forward when
/// [`ManualClock::advance`] or [`ManualClock::set`] is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: std::sync::Arc<std::sync::RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock fixed at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::RwLock::new(truncate_to_minute(start))),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.now.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += duration;
    }

    /// Set the clock to an exact instant.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = truncate_to_minute(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
