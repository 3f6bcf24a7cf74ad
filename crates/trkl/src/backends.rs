//! 🔌 Backends: where the bytes finally land.
//!
//! 🚰 The read worker pours throttled chunks into a channel; a backend drinks from the other end
//! and puts them somewhere durable. Or somewhere in RAM. We don't judge.
//!
//! 🎭 This module is the casting agency:
//! - `S3`: the real deal. Streams the body to an S3-compatible `PutObject`.
//! - `File`: writes `<root_dir>/<bucket>/<key>` on local disk. For rehearsals.
//! - `InMemory`: keeps the object in a HashMap. For tests, dry runs, and trust issues.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::app_config::SinkConfig;

mod file;
mod in_mem;
mod s3;

pub use file::{FileSink, FileSinkConfig};
pub use in_mem::InMemorySink;
pub use s3::{S3Sink, S3SinkConfig};

/// 🚿 The upload body: a bounded channel of throttled chunks. Closed channel = end of object.
///
/// An `Err` item means the read side failed; the backend must abort the object, not finish it.
pub type UploadBody = async_channel::Receiver<std::io::Result<Bytes>>;

/// 🎯 Where an object goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
}

impl ObjectTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// 🕳️ Something that can swallow a whole object from an [`UploadBody`].
///
/// # Contract
/// - Drain `body` until it closes, then make the object durable. Return `Ok(())`.
/// - If `body` yields an `Err`, abandon the object and return an error.
/// - `content_length` is the byte count the body will deliver if all goes well.
/// - No retries here. Retrying belongs to whatever client library the backend wraps.
#[async_trait]
pub trait ObjectSink: std::fmt::Debug + Send {
    async fn put_object(
        &mut self,
        target: &ObjectTarget,
        body: UploadBody,
        content_length: u64,
    ) -> Result<()>;
}

/// 🎭 The many faces of a sink. The uploader doesn't know or care which one it got.
#[derive(Debug)]
pub enum SinkBackend {
    S3(S3Sink),
    File(FileSink),
    InMemory(InMemorySink),
}

impl SinkBackend {
    /// 🏗️ Build the backend the config asks for.
    pub async fn from_config(sink_config: &SinkConfig) -> Result<Self> {
        Ok(match sink_config {
            SinkConfig::S3(s3_config) => SinkBackend::S3(S3Sink::new(s3_config.clone()).await?),
            SinkConfig::File(file_config) => SinkBackend::File(FileSink::new(file_config.clone())),
            SinkConfig::InMemory => SinkBackend::InMemory(InMemorySink::default()),
        })
    }
}

#[async_trait]
impl ObjectSink for SinkBackend {
    async fn put_object(
        &mut self,
        target: &ObjectTarget,
        body: UploadBody,
        content_length: u64,
    ) -> Result<()> {
        match self {
            SinkBackend::S3(sink) => sink.put_object(target, body, content_length).await,
            SinkBackend::File(sink) => sink.put_object(target, body, content_length).await,
            SinkBackend::InMemory(sink) => sink.put_object(target, body, content_length).await,
        }
    }
}
