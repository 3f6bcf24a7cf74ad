//! 🪣 The Token Bucket: a bouncer that counts bytes instead of heads.
//!
//! 🎬 COLD OPEN. INT. NVMe DRIVE, 2:13 AM
//!
//! The disk could do 3 GB/s. The disk WANTED to do 3 GB/s. The production database sharing
//! that disk had other plans. Somebody had to stand in the doorway and say
//! "two hundred megabytes per second, and not a byte more". That somebody is this module.
//!
//! 🧠 Knowledge graph:
//! - Permits = bytes. They refill continuously at `rate` per second, capped at `burst`.
//! - Refill is computed from elapsed clock time on every request. No background task, no ticks.
//! - `wait_for_n` queues callers on a FIFO turnstile; only the head of the line sleeps.
//! - Cancellation or deadline via [`OperationContext`]; a cancelled wait deducts nothing.
//! - Shared across readers with `Arc<TokenBucket>`. One bucket = one aggregate throughput cap.
//!
//! 🦆 The duck pays full price. The duck has never once asked for a burst.

mod clock;

pub use clock::{Clock, ManualClock, TokioClock};

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::context::{ContextError, OperationContext};

// -- 🔬 floating point crumbs. after sleeping exactly `deficit / rate`, the refill can land a
// -- hair short of `n`. a millionth of a byte is not worth another trip through the timer wheel.
const PERMIT_EPSILON: f64 = 1e-6;

/// 💀 Everything the limiter can say no with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    /// 🛑 The context was cancelled or its deadline passed before permits showed up.
    #[error("throttled wait aborted: {0}")]
    Interrupted(#[from] ContextError),
    /// 🐘 Asked for more than the bucket can ever hold. Caller bug, not a runtime condition.
    #[error("requested {requested} permits but the bucket only ever holds {burst}")]
    ExceedsBurst { requested: usize, burst: usize },
    #[error("refill rate must be finite and positive, got {rate}")]
    InvalidRate { rate: f64 },
    #[error("burst capacity must be at least one permit")]
    InvalidBurst,
}

impl LimiterError {
    /// 🔎 The context's reason, if this was a cancelled or expired wait.
    pub fn interruption(&self) -> Option<ContextError> {
        match self {
            LimiterError::Interrupted(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    permits: f64,
    last_refill: Instant,
}

/// 🪣 A thread-safe token bucket.
///
/// Starts full. Never holds more than `burst` permits, never goes negative.
#[derive(Debug)]
pub struct TokenBucket<C: Clock = TokioClock> {
    rate: f64,
    burst: usize,
    state: Mutex<BucketState>,
    // 🚦 FIFO line for waiters. tokio's mutex hands out the lock in arrival order,
    // and dropping a pending `lock()` quietly leaves the line.
    turnstile: tokio::sync::Mutex<()>,
    clock: C,
}

impl TokenBucket<TokioClock> {
    /// 🚀 A bucket on the real (tokio) clock.
    ///
    /// 💀 Fails if `rate` isn't finite and positive, or `burst` is zero.
    pub fn new(rate: f64, burst: usize) -> Result<Self, LimiterError> {
        Self::with_clock(rate, burst, TokioClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// 🕰️ A bucket on whatever clock you hand it.
    pub fn with_clock(rate: f64, burst: usize, clock: C) -> Result<Self, LimiterError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(LimiterError::InvalidRate { rate });
        }
        if burst == 0 {
            return Err(LimiterError::InvalidBurst);
        }

        let now = clock.now();
        Ok(Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                permits: burst as f64,
                last_refill: now,
            }),
            turnstile: tokio::sync::Mutex::new(()),
            clock,
        })
    }

    /// 📏 Maximum permits the bucket can hold. Size your reads with this.
    pub fn burst(&self) -> usize {
        self.burst
    }

    /// 🚰 Sustained refill rate, permits per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// 👀 Permits available right now (after refilling).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.permits
    }

    /// 🎰 Take `n` permits if they're here right now. No waiting, no queueing.
    ///
    /// Zero always succeeds. More than `burst` never does. While a `wait_for_n` caller holds
    /// the front of the line this returns `false` too: permits refilling for the head waiter
    /// are already spoken for.
    pub fn try_acquire_n(&self, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        if n > self.burst {
            return false;
        }
        let Ok(_no_line_to_cut) = self.turnstile.try_lock() else {
            trace!("🚦 {} permits requested while someone is waiting in line, declined", n);
            return false;
        };
        self.try_grant(n).is_ok()
    }

    /// ⏳ Wait until `n` permits exist, then take them.
    ///
    /// - `n == 0` returns immediately.
    /// - `n > burst()` is rejected with [`LimiterError::ExceedsBurst`] instead of hanging forever.
    /// - If `ctx` is already done, or finishes while we wait, returns
    ///   [`LimiterError::Interrupted`] promptly and deducts nothing.
    /// - If `ctx` has a deadline and the permits can't possibly accumulate before it,
    ///   fails right away with `DeadlineExceeded` rather than sleeping until the bitter end.
    pub async fn wait_for_n(&self, ctx: &OperationContext, n: usize) -> Result<(), LimiterError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.burst {
            return Err(LimiterError::ExceedsBurst {
                requested: n,
                burst: self.burst,
            });
        }
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }

        // 🚦 get in line. bail out of the line if the context gives up first.
        let _the_front_of_the_line = tokio::select! {
            biased;
            reason = ctx.done() => return Err(reason.into()),
            guard = self.turnstile.lock() => guard,
        };

        loop {
            let wait = match self.try_grant(n) {
                Ok(()) => {
                    trace!("🪣 granted {} permits", n);
                    return Ok(());
                }
                Err(wait) => wait,
            };

            // -- ⌛ the deadline and the nap below both live on tokio's timeline, whatever clock refills
            if let Some(deadline) = ctx.deadline() {
                if wait > deadline.saturating_duration_since(Instant::now()) {
                    trace!(
                        "⌛ {} permits need {:?} but the deadline says no, failing fast",
                        n,
                        wait
                    );
                    return Err(ContextError::DeadlineExceeded.into());
                }
            }

            trace!("💤 short {} permits worth {:?} of refill, napping", n, wait);
            tokio::select! {
                biased;
                reason = ctx.done() => return Err(reason.into()),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// 🔄 Top up the bucket with whatever accrued since the last look.
    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill);
        state.permits = (state.permits + elapsed.as_secs_f64() * self.rate).min(self.burst as f64);
        state.last_refill = now;
    }

    /// 🎯 Deduct `n` if present; otherwise report how long until it would be.
    fn try_grant(&self, n: usize) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let wanted = n as f64;
        if state.permits + PERMIT_EPSILON >= wanted {
            state.permits = (state.permits - wanted).max(0.0);
            return Ok(());
        }

        let deficit_secs = (wanted - state.permits) / self.rate;
        Err(Duration::try_from_secs_f64(deficit_secs).unwrap_or(Duration::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn the_drained_bucket(rate: f64, burst: usize) -> TokenBucket {
        let bucket = TokenBucket::new(rate, burst).expect("💀 valid config rejected");
        assert!(bucket.try_acquire_n(burst), "💀 a fresh bucket should start full");
        bucket
    }

    #[test]
    fn the_one_where_nonsense_configs_get_bounced() {
        assert_eq!(
            TokenBucket::new(0.0, 10).unwrap_err(),
            LimiterError::InvalidRate { rate: 0.0 }
        );
        assert!(matches!(
            TokenBucket::new(f64::NAN, 10),
            Err(LimiterError::InvalidRate { .. })
        ));
        assert!(matches!(
            TokenBucket::new(-5.0, 10),
            Err(LimiterError::InvalidRate { .. })
        ));
        assert_eq!(TokenBucket::new(10.0, 0).unwrap_err(), LimiterError::InvalidBurst);
    }

    #[test]
    fn the_one_where_refill_is_just_arithmetic_on_a_clock() {
        let the_clock = ManualClock::new();
        let bucket = TokenBucket::with_clock(1000.0, 1000, the_clock.clone())
            .expect("💀 valid config rejected");

        assert_eq!(bucket.burst(), 1000);
        assert_eq!(bucket.rate(), 1000.0);
        assert!(bucket.try_acquire_n(1000));
        assert!(!bucket.try_acquire_n(1), "💀 an empty bucket handed out a permit");

        the_clock.advance(Duration::from_millis(250));
        assert!((bucket.available() - 250.0).abs() < 1e-6);
        assert!(!bucket.try_acquire_n(251));
        assert!(bucket.try_acquire_n(250));

        // -- 🏖️ a long vacation doesn't overflow the bucket
        the_clock.advance(Duration::from_secs(3600));
        assert_eq!(bucket.available(), 1000.0);
    }

    #[test]
    fn the_one_where_zero_is_free_and_elephants_are_not() {
        let bucket = TokenBucket::with_clock(10.0, 100, ManualClock::new())
            .expect("💀 valid config rejected");
        assert!(bucket.try_acquire_n(0));
        assert!(!bucket.try_acquire_n(101));
        assert_eq!(bucket.available(), 100.0, "💀 failed requests must not leak permits");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_zero_permits_never_wait() {
        let bucket = the_drained_bucket(1.0, 10);
        let before = Instant::now();
        bucket
            .wait_for_n(&OperationContext::background(), 0)
            .await
            .expect("💀 zero permits should be free");
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_asking_for_more_than_burst_is_rejected_not_hung() {
        let bucket = TokenBucket::new(100.0, 100).expect("💀 valid config rejected");
        let result = bucket.wait_for_n(&OperationContext::background(), 101).await;
        assert_eq!(
            result,
            Err(LimiterError::ExceedsBurst {
                requested: 101,
                burst: 100
            })
        );
        assert_eq!(bucket.available(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_waiter_sleeps_exactly_as_long_as_the_refill_needs() {
        let bucket = the_drained_bucket(1000.0, 1000);
        let before = Instant::now();

        bucket
            .wait_for_n(&OperationContext::background(), 500)
            .await
            .expect("💀 wait should succeed");

        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "waited only {elapsed:?}");
        assert!(elapsed < Duration::from_millis(510), "waited way too long: {elapsed:?}");
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_expired_context_fails_without_blocking() {
        let bucket = TokenBucket::new(1000.0, 1000).expect("💀 valid config rejected");
        let the_doomed_context = OperationContext::with_timeout(Duration::ZERO);
        let before = Instant::now();

        let result = bucket.wait_for_n(&the_doomed_context, 10).await;

        assert_eq!(result, Err(LimiterError::Interrupted(ContextError::DeadlineExceeded)));
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(bucket.available(), 1000.0, "💀 an aborted wait spent permits");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_cancel_mid_wait_leaves_the_books_balanced() {
        let bucket = Arc::new(the_drained_bucket(1000.0, 1000));
        let ctx = OperationContext::background();

        let the_waiter = {
            let bucket = Arc::clone(&bucket);
            let ctx = ctx.clone();
            tokio::spawn(async move { bucket.wait_for_n(&ctx, 1000).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let cancelled_at = Instant::now();
        ctx.cancel();

        let result = the_waiter.await.expect("💀 waiter panicked");
        assert_eq!(result, Err(LimiterError::Interrupted(ContextError::Cancelled)));
        assert!(cancelled_at.elapsed() < Duration::from_millis(5), "💀 cancellation was not prompt");

        // -- 📒 100ms at 1000/s = 100 permits, exactly as if the waiter never existed
        assert!((bucket.available() - 100.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_hopeless_deadline_fails_fast() {
        let bucket = the_drained_bucket(1000.0, 1000);
        let ctx = OperationContext::with_timeout(Duration::from_millis(500));
        let before = Instant::now();

        let result = bucket.wait_for_n(&ctx, 1000).await;

        assert_eq!(result, Err(LimiterError::Interrupted(ContextError::DeadlineExceeded)));
        assert_eq!(before.elapsed(), Duration::ZERO, "💀 should not sleep into a known-lost cause");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_reachable_deadline_is_honored() {
        let bucket = the_drained_bucket(1000.0, 1000);
        let ctx = OperationContext::with_timeout(Duration::from_secs(2));

        bucket
            .wait_for_n(&ctx, 1000)
            .await
            .expect("💀 one second of refill fits inside a two second deadline");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_crowd_of_waiters_never_outruns_the_refill() {
        let bucket = Arc::new(TokenBucket::new(100.0, 100).expect("💀 valid config rejected"));
        let start = Instant::now();

        let mut the_crowd = Vec::new();
        for _ in 0..10 {
            let bucket = Arc::clone(&bucket);
            the_crowd.push(tokio::spawn(async move {
                bucket
                    .wait_for_n(&OperationContext::background(), 100)
                    .await
                    .expect("💀 waiter failed");
                start.elapsed()
            }));
        }

        let mut the_grant_times = Vec::new();
        for waiter in the_crowd {
            the_grant_times.push(waiter.await.expect("💀 waiter panicked"));
        }
        the_grant_times.sort();

        // -- 📐 by time t, at most burst + rate * t permits can have been handed out
        for (i, granted_at) in the_grant_times.iter().enumerate() {
            let handed_out = 100.0 * (i as f64 + 1.0);
            let allowed = 100.0 + 100.0 * granted_at.as_secs_f64() + 1e-3;
            assert!(
                handed_out <= allowed,
                "💀 {handed_out} permits handed out by {granted_at:?}, only {allowed} allowed"
            );
        }
        assert!(the_grant_times[9] >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_line_cutter_is_turned_away() {
        let bucket = Arc::new(the_drained_bucket(10.0, 10));
        let the_head_of_the_line = {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move { bucket.wait_for_n(&OperationContext::background(), 10).await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(
            !bucket.try_acquire_n(1),
            "💀 half a refill is reserved for the waiter, not up for grabs"
        );

        the_head_of_the_line
            .await
            .expect("💀 waiter panicked")
            .expect("💀 the waiter should get its full refill");
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_clock_from_the_future_doesnt_spook_the_deadline() {
        let the_clock = ManualClock::starting_at(Instant::now() + Duration::from_secs(3600));
        let bucket = TokenBucket::with_clock(1000.0, 1000, the_clock.clone())
            .expect("💀 valid config rejected");
        assert!(bucket.try_acquire_n(1000));
        let ctx = OperationContext::with_timeout(Duration::from_secs(2));

        // -- ⏩ the manual clock keeps pace with tokio time, just an hour ahead of it
        let the_ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                the_clock.advance(Duration::from_millis(100));
            }
        });
        let before = Instant::now();

        let result = bucket.wait_for_n(&ctx, 1000).await;
        the_ticker.abort();

        assert_eq!(result, Ok(()), "💀 one second of refill fits in two seconds, skew or not");
        assert!(before.elapsed() < Duration::from_secs(2));
    }
}
