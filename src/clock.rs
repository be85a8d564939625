//! Time source abstraction
//!
//! Every component reads "now" through a `Clock` rather than calling
//! `SystemTime::now()` directly, so the literal-timestamp scenarios in the
//! test suite (worker goes silent at T=1000, supervisor reacts at
//! T=1000+HEARTBEAT_TIMEOUT+SUPERVISOR_INTERVAL, ...) are constructible
//! without real sleeps.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of "milliseconds since epoch".
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}

/// A clock that only advances when told to. Used in tests that need
/// deterministic timestamps.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_clock_is_plausible() {
        let ms = RealClock.now_ms();
        assert!(ms > 1_700_000_000_000);
    }

    #[test]
    fn fixed_clock_advances_explicitly() {
        let clock = FixedClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1500);
        clock.set(9999);
        assert_eq!(clock.now_ms(), 9999);
    }
}
