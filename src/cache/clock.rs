//! Clock Module
//!
//! Wall-clock source used for entry creation and expiry checks.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

// == Clock Trait ==
/// Source of wall-clock time in whole seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp in seconds.
    fn timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// == Mock Clock ==
/// Manually driven clock for simulating elapsed time in tests.
///
/// Clones share the same underlying instant, so a clone handed to a driver
/// observes every `advance` made through the original.
#[derive(Debug, Clone)]
pub struct MockClock {
    seconds: Arc<AtomicI64>,
}

impl MockClock {
    /// Creates a clock frozen at the given Unix timestamp.
    pub fn at(timestamp: i64) -> Self {
        Self {
            seconds: Arc::new(AtomicI64::new(timestamp)),
        }
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute Unix timestamp.
    pub fn set(&self, timestamp: i64) {
        self.seconds.store(timestamp, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at(1_700_000_000)
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.seconds.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn timestamp(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

/// Shared clock handle held by drivers.
pub type SharedClock = Arc<dyn Clock>;

/// Returns a shared handle to the system clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::at(100);
        clock.advance(5);
        assert_eq!(clock.timestamp(), 105);
        assert_eq!(clock.now().timestamp(), 105);
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::at(10);
        let shared: SharedClock = Arc::new(clock.clone());
        clock.set(42);
        assert_eq!(shared.timestamp(), 42);
    }

    #[test]
    fn test_system_clock_is_recent() {
        assert!(SystemClock.timestamp() > 1_600_000_000);
    }
}
