//! 🕰️ Clocks: the limiter asks "what time is it?" and these answer.
//!
//! The bucket never runs a background timer. It just samples a clock whenever someone asks
//! for permits and does the refill math on the spot. Swap the clock, swap reality.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// ⏱️ Source of "now" for refill computations.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// 🧵 The real clock, by way of tokio, so `start_paused` tests fast-forward it for free.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 🖐️ A clock that only moves when you push it.
///
/// Great for refill math tests. Terrible for `wait_for_n`, which sleeps on tokio time and
/// re-samples this clock afterwards: if nobody advances it, the waiter waits. Forever. Like Hachikō.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// ⏩ Nudge time forward. Every clone sees the jump.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
