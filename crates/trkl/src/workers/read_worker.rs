//! 📖 ReadWorker: the disk end of the pipe.
//!
//! Reads `buffer_size` chunks through a [`ThrottledReader`] and sends each one into the
//! upload body. The channel is bounded, so a slow backend stalls the reads instead of
//! letting the file pile up in RAM.
//!
//! 💀 When a read fails, the worker pushes an `io::Error` into the body first (so the backend
//! aborts the object instead of finishing a short one), then returns the typed error.
//! A chunk whose permit wait was aborted is never sent. It was read, but it wasn't paid for.

use std::io;

use anyhow::Result;
use async_channel::Sender;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Worker;
use crate::progress::UploadProgress;
use crate::throttled_reader::{ThrottledReadError, ThrottledReader};

/// 💀 Why the read worker stopped early, and how far it got first.
#[derive(Debug, Error)]
#[error("read worker stopped after {bytes_read} throttled bytes")]
pub(crate) struct ReadFailure {
    pub(crate) bytes_read: u64,
    #[source]
    pub(crate) cause: ThrottledReadError,
}

#[derive(Debug)]
pub(crate) struct ReadWorker<R> {
    reader: ThrottledReader<R>,
    tx: Sender<io::Result<Bytes>>,
    buffer_size: usize,
    progress: UploadProgress,
}

impl<R> ReadWorker<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub(crate) fn new(
        reader: ThrottledReader<R>,
        tx: Sender<io::Result<Bytes>>,
        buffer_size: usize,
        progress: UploadProgress,
    ) -> Self {
        Self {
            reader,
            tx,
            // -- 📏 a zero-sized buffer would read "nothing" forever and call it EOF
            buffer_size: buffer_size.max(1),
            progress,
        }
    }

    async fn pump(&mut self) -> Result<u64, ThrottledReadError> {
        loop {
            let mut chunk = BytesMut::zeroed(self.buffer_size);
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(self.reader.bytes_read());
            }
            chunk.truncate(n);
            self.progress.update(n as u64);
            trace!("📖 read worker forwarding {} throttled bytes", n);
            if self.tx.send(Ok(chunk.freeze())).await.is_err() {
                // -- 🚪 the backend hung up. its own error tells the story; ours would just echo it.
                debug!("🚪 upload body closed early after {} bytes", self.reader.bytes_read());
                return Ok(self.reader.bytes_read());
            }
        }
    }
}

/// 🔁 The body-side copy of a read failure. `io::Error` isn't `Clone`, so it's rebuilt from the kind.
fn as_body_error(err: &ThrottledReadError) -> io::Error {
    let kind = match err {
        ThrottledReadError::Source(source) => source.kind(),
        ThrottledReadError::Aborted { .. } => io::ErrorKind::TimedOut,
        ThrottledReadError::Closed => io::ErrorKind::BrokenPipe,
    };
    io::Error::new(kind, err.to_string())
}

impl<R> Worker for ReadWorker<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    type Output = u64;

    fn start(mut self) -> JoinHandle<Result<u64>> {
        tokio::spawn(async move {
            debug!("📖 ReadWorker started, {} byte chunks", self.buffer_size);
            match self.pump().await {
                Ok(bytes_read) => {
                    self.progress.finish();
                    debug!("🏁 ReadWorker done after {} bytes", bytes_read);
                    Ok(bytes_read)
                }
                Err(err) => {
                    self.progress.abandon();
                    // -- 📬 best effort: if the backend already left, nobody's listening anyway
                    let _ = self.tx.send(Err(as_body_error(&err))).await;
                    Err(anyhow::Error::new(ReadFailure {
                        bytes_read: self.reader.bytes_read(),
                        cause: err,
                    }))
                }
            }
            // -- 🏁 `self.tx` drops here, which is how the backend learns the object is complete
        })
    }
}
