//! ⏰ OperationContext: the egg timer strapped to every upload.
//!
//! 🎬 *[a progress bar crawls. a deadline approaches. nobody blinks.]*
//!
//! Every blocking wait in trkl takes one of these. It carries exactly two bits of bad news:
//! "somebody pressed cancel" and "we ran out of time". It owns nothing, it spawns nothing,
//! it just knows when to say no. Like a good friend at 1am outside a kebab shop.
//!
//! 🧠 Knowledge graph:
//! - Cancellation is a `tokio_util` `CancellationToken` (clones share it, children inherit it)
//! - Deadline is an optional `tokio::time::Instant`, so paused-time tests can fast-forward it
//! - `done()` is the future to race against in `select!`; `err()` is the cheap synchronous peek
//! - Consumed by `TokenBucket::wait_for_n` and the uploader's network race 🦆

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 🛑 Why the context gave up. Two flavors of "no".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// 🔴 Someone called `cancel()`, on us or on an ancestor.
    #[error("operation cancelled")]
    Cancelled,
    /// ⌛ The deadline came and went, like my gym membership's promise.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// ⏰ A cancellation + deadline token threaded through every wait.
///
/// Cheap to clone; every clone observes the same cancellation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OperationContext {
    /// 🌌 A context that never expires on its own. Cancel it manually or live forever.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// ⏱️ A context that expires `timeout` from now.
    ///
    /// A zero timeout is already expired. A timeout so large that `Instant` can't hold it
    /// degrades to "no deadline", which is what you meant anyway.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::background(),
        }
    }

    /// 📅 A context that expires at an absolute instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// 👶 A child context: cancelled when the parent is, cancellable on its own without
    /// bothering the parent. Inherits the deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 👶⏱️ A child whose deadline is the earlier of the parent's and `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let the_new_deadline = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, the_new_deadline) {
            (Some(parent), Some(ours)) => Some(parent.min(ours)),
            (parent, ours) => parent.or(ours),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// 🔴 Pull the plug. Idempotent, and wakes every pending `done()`.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 👀 Synchronous peek: `Some(reason)` if the context is already done.
    ///
    /// Cancellation wins over an expired deadline when both are true.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// 💤 Resolves when the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context that nobody cancels. Race it, don't await it raw.
    pub async fn done(&self) -> ContextError {
        if let Some(reason) = self.err() {
            return reason;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}
