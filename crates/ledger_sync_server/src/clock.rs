//! Server clocks and watermark issuing.

use ledger_core::Watermark;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock seconds.
pub trait Clock: Send + Sync {
    /// Current time in whole seconds.
    fn now_seconds(&self) -> u64;
}

/// UNIX time from the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A settable clock for tests. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    pub fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    /// Sets the reading.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the reading forward.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Issues strictly increasing watermarks.
///
/// A tick is the wall clock reading, bumped past the last tick issued when
/// the clock has not moved on (or went backwards). Callers serialize access;
/// the store keeps this behind its commit lock.
pub struct WatermarkClock {
    clock: Arc<dyn Clock>,
    last_issued: u64,
}

impl WatermarkClock {
    /// Creates a watermark clock that has issued nothing yet.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_issued: 0,
        }
    }

    /// The tick the next [`WatermarkClock::issue`] would return.
    pub fn peek(&self) -> Watermark {
        Watermark::new(self.clock.now_seconds().max(self.last_issued + 1))
    }

    /// Issues the next tick.
    pub fn issue(&mut self) -> Watermark {
        let tick = self.peek();
        self.last_issued = tick.as_u64();
        tick
    }

    /// Records that `tick` was issued earlier (used on recovery).
    pub fn observe(&mut self, tick: Watermark) {
        self.last_issued = self.last_issued.max(tick.as_u64());
    }

    /// The last tick issued, or zero.
    pub fn last_issued(&self) -> Watermark {
        Watermark::new(self.last_issued)
    }
}

impl std::fmt::Debug for WatermarkClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkClock")
            .field("last_issued", &self.last_issued)
            .finish_non_exhaustive()
    }
}
