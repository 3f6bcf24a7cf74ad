//! 🐢 ThrottledReader: the speed bump between your disk and the internet.
//!
//! 🎬 "In a world where NVMe drives outrun everything... one reader dared to pump the brakes."
//!
//! Wraps any `AsyncRead`, and for every read:
//!   1. caps the request at the bucket's burst (so no single wait asks for the impossible),
//!   2. does exactly ONE read on the underlying source,
//!   3. waits for exactly as many permits as bytes actually came back,
//!   4. hands the bytes over.
//!
//! No buffering between calls. No retries. No hidden tasks. Just a reader that
//! says "please wait" a lot, like a DMV clerk with a token bucket.
//!
//! 🧠 Knowledge graph:
//! - Limiter: `Arc<TokenBucket>`, share one across readers to cap aggregate throughput
//! - Context: one `OperationContext` per upload, fixed at construction, consulted on every wait
//! - Lifecycle: `Active → (EOF | source error | aborted wait) → closed`. No comebacks.
//! - Errors: `Source` (disk said no) vs `Aborted` (clock said no). callers branch on that 🦆

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::context::{ContextError, OperationContext};
use crate::limiter::{Clock, LimiterError, TokenBucket, TokioClock};

/// 💀 How a throttled read can go sideways.
#[derive(Debug, Error)]
pub enum ThrottledReadError {
    /// 💾 The underlying source failed. Passed through untouched, never retried.
    #[error("disk read failed")]
    Source(#[from] io::Error),
    /// ⌛ The bytes were read, but the wait for permits was aborted.
    ///
    /// `bytes_read` bytes sit at the front of the caller's buffer; they're yours, but the
    /// stream is done.
    #[error("read {bytes_read} bytes but the throttled wait was aborted")]
    Aborted {
        bytes_read: usize,
        #[source]
        cause: LimiterError,
    },
    /// 🚪 A previous read already failed. This reader has left the building.
    #[error("reader is closed after an earlier failure")]
    Closed,
}

impl ThrottledReadError {
    /// 🔎 `Some(reason)` when this was a cancelled or expired wait rather than a disk problem.
    pub fn interruption(&self) -> Option<ContextError> {
        match self {
            ThrottledReadError::Aborted { cause, .. } => cause.interruption(),
            _ => None,
        }
    }
}

/// 🚦 Where a reader is in its short, throttled life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Active,
    /// 🏁 Hit EOF. Further reads return `Ok(0)` without touching the source.
    Exhausted,
    /// 💀 A read failed. Further reads return [`ThrottledReadError::Closed`].
    Failed,
}

/// 🐢 A byte source that only goes as fast as its token bucket allows.
pub struct ThrottledReader<R, C: Clock = TokioClock> {
    inner: R,
    limiter: Arc<TokenBucket<C>>,
    ctx: OperationContext,
    state: ReaderState,
    // -- 📊 bytes that made it through the bucket. aborted reads don't count.
    bytes_read: u64,
}

// 🐛 `inner` stays out of Debug: most AsyncReads don't implement it, and nobody debugging
// a throttle wants a file descriptor dump anyway.
impl<R, C: Clock> std::fmt::Debug for ThrottledReader<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledReader")
            .field("limiter", &self.limiter)
            .field("state", &self.state)
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

impl<R, C> ThrottledReader<R, C>
where
    R: AsyncRead + Unpin,
    C: Clock,
{
    /// 🚀 Wrap `inner`. The limiter is injected, so several readers can share one budget.
    pub fn new(inner: R, limiter: Arc<TokenBucket<C>>, ctx: OperationContext) -> Self {
        Self {
            inner,
            limiter,
            ctx,
            state: ReaderState::Active,
            bytes_read: 0,
        }
    }

    /// 📖 Read up to `buf.len()` bytes, throttled.
    ///
    /// - `Ok(n)` with `n > 0`: `n` bytes are in `buf[..n]` and their permits are paid for.
    /// - `Ok(0)`: end of stream (or an empty `buf`). No permits are spent on nothing.
    /// - `Err(Aborted { bytes_read, .. })`: bytes are in `buf[..bytes_read]`, but the context
    ///   gave up during the wait. Stop reading.
    /// - `Err(Source(..))`: the source's own error, verbatim.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ThrottledReadError> {
        match self.state {
            ReaderState::Active => {}
            ReaderState::Exhausted => return Ok(0),
            ReaderState::Failed => return Err(ThrottledReadError::Closed),
        }
        if buf.is_empty() {
            return Ok(0);
        }

        // 📏 never ask for more than the bucket can ever grant in one wait
        let effective_len = buf.len().min(self.limiter.burst());

        let n = match self.inner.read(&mut buf[..effective_len]).await {
            Ok(n) => n,
            Err(err) => {
                warn!("💾 underlying read failed after {} bytes: {}", self.bytes_read, err);
                self.state = ReaderState::Failed;
                return Err(ThrottledReadError::Source(err));
            }
        };

        if n == 0 {
            debug!("🏁 source exhausted after {} throttled bytes", self.bytes_read);
            self.state = ReaderState::Exhausted;
            return Ok(0);
        }

        if let Err(cause) = self.limiter.wait_for_n(&self.ctx, n).await {
            warn!(
                "⌛ throttled wait for {} bytes aborted after {} bytes: {}",
                n, self.bytes_read, cause
            );
            self.state = ReaderState::Failed;
            return Err(ThrottledReadError::Aborted {
                bytes_read: n,
                cause,
            });
        }

        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R, C: Clock> ThrottledReader<R, C> {
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// 📊 Total bytes handed out with permits paid.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn limiter(&self) -> &Arc<TokenBucket<C>> {
        &self.limiter
    }

    pub fn context(&self) -> &OperationContext {
        &self.ctx
    }

    /// 🎁 Give back the source. The bucket stays wherever else it's shared.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
