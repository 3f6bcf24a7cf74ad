//! 📁 FileSink: an "object store" made of directories and optimism.
//!
//! Objects land at `<root_dir>/<bucket>/<key>`. Handy for rehearsing a throttled upload
//! without paying AWS for the privilege.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, warn};

use crate::backends::{ObjectSink, ObjectTarget, UploadBody};

/// 🚰 Where on disk the pretend buckets live.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FileSinkConfig {
    pub root_dir: PathBuf,
}

#[derive(Debug)]
pub struct FileSink {
    sink_config: FileSinkConfig,
}

impl FileSink {
    pub fn new(sink_config: FileSinkConfig) -> Self {
        Self { sink_config }
    }

    /// 🗺️ Map `bucket/key` onto a path under `root_dir`.
    ///
    /// Keys are S3-style, so a leading `/` is dropped. `..` is refused: an object key
    /// does not get to wander out of its bucket.
    fn object_path(&self, target: &ObjectTarget) -> Result<PathBuf> {
        let the_key = target.key.trim_start_matches('/');
        if the_key.is_empty() {
            bail!("💀 object key for bucket '{}' is empty", target.bucket);
        }
        let relative = Path::new(&target.bucket).join(the_key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("💀 '{target}' tries to escape the sink root. Nice try.");
        }
        Ok(self.sink_config.root_dir.join(relative))
    }

    async fn drain_into(path: &Path, body: &UploadBody) -> Result<u64> {
        let file_handle = File::create(path)
            .await
            .context(format!("💀 could not create '{}'", path.display()))?;
        let mut file_buf = BufWriter::new(file_handle);
        let mut written = 0u64;
        while let Ok(chunk) = body.recv().await {
            let chunk = chunk.context("💀 the body broke mid-stream")?;
            file_buf.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file_buf
            .flush()
            .await
            .context(format!("💀 error flushing '{}'", path.display()))?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectSink for FileSink {
    async fn put_object(
        &mut self,
        target: &ObjectTarget,
        body: UploadBody,
        content_length: u64,
    ) -> Result<()> {
        let path = self.object_path(target)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("💀 could not create '{}'", parent.display()))?;
        }
        debug!("📁 writing {} to {}", target, path.display());

        let written = match Self::drain_into(&path, &body).await {
            Ok(written) => written,
            Err(err) => {
                // -- 🗑️ half an object is no object
                if let Err(cleanup) = fs::remove_file(&path).await {
                    warn!("🗑️ could not remove partial object '{}': {cleanup}", path.display());
                }
                return Err(err.context(format!("💀 failed to put {target} on disk")));
            }
        };

        if written != content_length {
            warn!(
                "📏 {} ended up {} bytes, expected {}. the file changed under us?",
                target, written, content_length
            );
        }
        info!("📁 wrote {} bytes to {}", written, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sink_in(dir: &tempfile::TempDir) -> FileSink {
        FileSink::new(FileSinkConfig {
            root_dir: dir.path().to_path_buf(),
        })
    }

    #[tokio::test]
    async fn the_one_where_the_object_lands_under_bucket_and_key() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let (tx, rx) = async_channel::bounded(4);
        tx.send(Ok(Bytes::from_static(b"abc"))).await.expect("💀 send");
        tx.send(Ok(Bytes::from_static(b"def"))).await.expect("💀 send");
        drop(tx);

        let mut sink = sink_in(&dir);
        sink.put_object(&ObjectTarget::new("bkt", "/nested/obj.bin"), rx, 6)
            .await
            .expect("💀 put failed");

        let on_disk = std::fs::read(dir.path().join("bkt/nested/obj.bin")).expect("💀 read back");
        assert_eq!(on_disk, b"abcdef");
    }

    #[tokio::test]
    async fn the_one_where_a_broken_body_leaves_no_file_behind() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let (tx, rx) = async_channel::bounded(4);
        tx.send(Ok(Bytes::from_static(b"abc"))).await.expect("💀 send");
        tx.send(Err(std::io::Error::other("disk gave up")))
            .await
            .expect("💀 send");
        drop(tx);

        let mut sink = sink_in(&dir);
        let result = sink.put_object(&ObjectTarget::new("bkt", "obj"), rx, 6).await;

        assert!(result.is_err());
        assert!(!dir.path().join("bkt/obj").exists());
    }

    #[tokio::test]
    async fn the_one_where_dot_dot_stays_home() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let (_tx, rx) = async_channel::bounded::<std::io::Result<Bytes>>(1);

        let mut sink = sink_in(&dir);
        let result = sink
            .put_object(&ObjectTarget::new("bkt", "../../etc/passwd"), rx, 0)
            .await;

        assert!(result.is_err());
    }
}
