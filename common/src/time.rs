//! Time utilities and clock abstractions for BatchSettle.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// A timestamp with timezone (always UTC for BatchSettle).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    /// Negative durations clamp to zero.
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> Timestamp;

    /// Wall-clock wait from now until `at`; zero if `at` has passed.
    fn until(&self, at: Timestamp) -> std::time::Duration {
        (at - self.now()).as_std()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            current: RwLock::new(at),
        }
    }

    /// Move the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        *self.current.write() = at;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.current.write() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read()
    }
}
