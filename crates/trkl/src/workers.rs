//! 🧵 Workers: the ones who actually do the work while `upload()` takes all the credit.
//!
//! 🚀 Right now the crew is one worker strong: the [`ReadWorker`], which pulls throttled
//! chunks off the disk and pours them into the upload body. The backend on the other end
//! of the channel runs on the caller's task, so there's no sink worker to babysit.

use anyhow::Result;
use tokio::task::JoinHandle;

mod read_worker;
pub(crate) use read_worker::{ReadFailure, ReadWorker};

/// 🏗️ A background worker, that does work. duh.
///
/// `start` consumes the worker and hands back the join handle, so the caller decides
/// whether to await it, race it, or abort it.
pub(crate) trait Worker {
    type Output;

    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
