//! server clock abstraction; timestamps are epoch milliseconds
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::Timestamp;

pub trait Clock: Send + Sync {
    /// the current time in epoch millis
    fn now(&self) -> Timestamp;
}

/// wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as Timestamp,
            Err(_) => 0,
        }
    }
}

/// A clock that only moves when told to. Shared between caches and services
/// to make timing deterministic.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> ManualClock {
        ManualClock {
            millis: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: Timestamp) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// move forward by `millis` and return the new time
    pub fn advance(&self, millis: i64) -> Timestamp {
        self.millis.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        assert_eq!(clock.advance(250), 1_250);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }
}
