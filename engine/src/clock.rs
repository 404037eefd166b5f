//! Wall clock used to stamp `updated_at` on local writes.
//!
//! Timestamps never go backwards within a process, even when the system
//! clock is adjusted, so `updated_at` stays monotonically non-decreasing.

use crate::Timestamp;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of write timestamps in milliseconds since epoch.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// System clock, clamped so it never returns a value lower than before.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let previous = self.last.fetch_max(wall, Ordering::SeqCst);
        previous.max(wall)
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Set the current time.
    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
