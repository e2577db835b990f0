//! Clock abstraction for staleness checks.
//!
//! The protocol only needs a monotonic, comparable reading with an
//! arbitrary epoch. Units are whatever the caller configures `t_fail` and
//! `t_remove` in: ticks for [`ManualClock`], milliseconds for
//! [`SystemClock`].
//!
//! Uses `web_time` so the same code runs natively and in the browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::Instant;

/// Source of logical timestamps. Must be monotonic per node.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Manually driven clock for simulations and tests.
///
/// Clones share the same reading, so one driver can advance the clock seen
/// by every node of a simulated cluster.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Move the clock forward. Returns the new reading.
    pub fn advance(&self, by: u64) -> u64 {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }

    /// Jump to a reading. Readings never go backwards.
    pub fn set(&self, now: u64) {
        self.now.fetch_max(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Wall clock reporting milliseconds since the clock was created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}
