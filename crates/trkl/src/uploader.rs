//! 🚚 Uploader: one local file, one object, one speed limit.
//!
//! 🧠 Knowledge graph:
//! - the file is opened here and wrapped in a [`ThrottledReader`] bound to the upload's context
//! - a [`ReadWorker`] pumps throttled chunks into a bounded channel (the upload body)
//! - the backend drains the body on this task, raced against `ctx.done()` so the deadline
//!   bounds the network side too, not just the permit waits
//! - once the context fires, the backend keeps getting polled (for a short grace) until it sees
//!   the worker's error item and abandons the object on its own terms
//! - the outcome is classified once, at the end: interrupted (context said stop) vs failed
//!   (disk or backend said no) vs done
//!
//! Bytes already handed to the backend are never rolled back. An interrupted upload is
//! simply an object that never got finished. 🦆

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tokio::fs::File;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::app_config::{RuntimeConfig, UploadConfig};
use crate::backends::{ObjectSink, ObjectTarget};
use crate::context::{ContextError, OperationContext};
use crate::limiter::TokenBucket;
use crate::progress::UploadProgress;
use crate::throttled_reader::ThrottledReader;
use crate::workers::{ReadFailure, ReadWorker, Worker};

// -- ⏳ how long an interrupted backend gets to clean up after itself before it's dropped mid-flight
const ABANDON_GRACE: Duration = Duration::from_secs(5);

/// 📦 A local file and the object it should become.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub file_name: PathBuf,
    pub target: ObjectTarget,
}

impl From<&UploadConfig> for UploadRequest {
    fn from(upload_config: &UploadConfig) -> Self {
        Self {
            file_name: upload_config.file_name.clone(),
            target: ObjectTarget::new(&upload_config.bucket, &upload_config.key),
        }
    }
}

/// 🧾 Proof of delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub target: ObjectTarget,
    pub bytes_uploaded: u64,
    pub elapsed: Duration,
}

/// 💀 How an upload can end badly.
#[derive(Debug, Error)]
pub enum UploadError {
    /// ⌛ The context was cancelled or ran out of time. Whatever was sent stays sent.
    #[error("upload to {target} interrupted after {bytes_read} bytes: {reason}")]
    Interrupted {
        target: ObjectTarget,
        reason: ContextError,
        bytes_read: u64,
    },
    /// 💥 The disk, the backend, or the config said no.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl UploadError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, UploadError::Interrupted { .. })
    }

    /// ⌛ Why the context stopped the upload, if it did.
    pub fn interruption(&self) -> Option<ContextError> {
        match self {
            UploadError::Interrupted { reason, .. } => Some(*reason),
            UploadError::Failed(_) => None,
        }
    }
}

/// 🚀 Upload `request.file_name` to `request.target` through `sink`, never faster than `limiter`.
///
/// The limiter is shared, not owned: hand the same `Arc` to several uploads and they split
/// one budget between them.
pub async fn upload<S>(
    ctx: &OperationContext,
    request: &UploadRequest,
    limiter: Arc<TokenBucket>,
    sink: &mut S,
    runtime: &RuntimeConfig,
) -> Result<UploadReceipt, UploadError>
where
    S: ObjectSink + ?Sized,
{
    let started = Instant::now();
    let target = &request.target;

    let file = File::open(&request.file_name).await.context(format!(
        "💀 could not open '{}' for upload. Check the path, and that it's a file you can read.",
        request.file_name.display()
    ))?;
    let content_length = file
        .metadata()
        .await
        .context(format!("💀 could not stat '{}'", request.file_name.display()))?
        .len();

    info!(
        "🚚 uploading {} ({} bytes) to {} at {} bytes/s",
        request.file_name.display(),
        content_length,
        target,
        limiter.rate()
    );

    let progress = UploadProgress::new(target.to_string(), content_length, runtime.show_progress);
    let reader = ThrottledReader::new(file, limiter, ctx.clone());
    let (tx, body) = async_channel::bounded(runtime.queue_capacity.max(1));
    let read_handle = ReadWorker::new(reader, tx, runtime.read_buffer_bytes, progress).start();

    let mut put = sink.put_object(target, body, content_length);
    // -- 🏁 biased toward the backend: if both finish in the same poll, a finished object counts
    let sink_result = tokio::select! {
        biased;
        result = &mut put => Some(result),
        _ = ctx.done() => None,
    };
    // -- 🧹 the context fired, so the read worker is about to push an error into the body.
    // -- keep polling the backend long enough to see it and abandon the object itself.
    let sink_result = match sink_result {
        Some(result) => Some(result),
        None => match tokio::time::timeout(ABANDON_GRACE, &mut put).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("🧹 {} didn't abandon its object within {:?}, dropping it", target, ABANDON_GRACE);
                None
            }
        },
    };
    drop(put);

    let read_result = match read_handle.await {
        Ok(result) => result,
        Err(join_err) => Err(anyhow!("💀 the read worker panicked or was cancelled: {join_err}")),
    };

    let read_failure = read_result.as_ref().err().and_then(|err| err.downcast_ref::<ReadFailure>());
    let bytes_read = match (&read_result, read_failure) {
        (Ok(bytes_read), _) => *bytes_read,
        (Err(_), Some(failure)) => failure.bytes_read,
        (Err(_), None) => 0,
    };

    let everything_worked = matches!(sink_result, Some(Ok(()))) && read_result.is_ok();
    let interruption = ctx
        .err()
        .filter(|_| !everything_worked)
        .or_else(|| read_failure.and_then(|failure| failure.cause.interruption()));
    if let Some(reason) = interruption {
        warn!("⌛ upload to {} interrupted after {} bytes: {}", target, bytes_read, reason);
        return Err(UploadError::Interrupted {
            target: target.clone(),
            reason,
            bytes_read,
        });
    }

    // -- 💾 a read failure outranks the backend's complaint, which is usually just the echo of it
    read_result.context(format!("💀 reading '{}' failed", request.file_name.display()))?;
    match sink_result {
        Some(result) => result.context(format!("💀 failed to upload object to {target}"))?,
        None => {
            // -- 🤷 the context fired but cleared by the time we looked. can't happen, but no panics.
            return Err(anyhow!("💀 upload to {target} stopped without a reason").into());
        }
    }

    let receipt = UploadReceipt {
        target: target.clone(),
        bytes_uploaded: bytes_read,
        elapsed: started.elapsed(),
    };
    info!(
        "✅ uploaded {} bytes to {} in {:.2?}",
        receipt.bytes_uploaded, receipt.target, receipt.elapsed
    );
    Ok(receipt)
}
