//! Injectable time source for the writer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds-since-epoch clock.
///
/// The writer never reads the system time directly; it asks its clock, so
/// tests can pin "now" and historical logs can be replayed in entry time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;

    /// Called with the `ms` of every entry before it is validated.
    fn observe(&self, _ms: i64) {}
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        ManualClock {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Mock time for re-sharding historical logs: "now" is the largest entry
/// `ms` observed so far, falling back to wall time before the first entry.
#[derive(Debug, Default)]
pub struct ReplayClock {
    latest: AtomicI64,
}

impl ReplayClock {
    pub fn new() -> Self {
        ReplayClock::default()
    }
}

impl Clock for ReplayClock {
    fn now_ms(&self) -> i64 {
        match self.latest.load(Ordering::SeqCst) {
            0 => SystemClock.now_ms(),
            ms => ms,
        }
    }

    fn observe(&self, ms: i64) {
        self.latest.fetch_max(ms, Ordering::SeqCst);
    }
}
