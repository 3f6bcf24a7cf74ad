//! 🐢 trkl: upload a file to object storage without letting it eat the disk or the network.
//!
//! 🧠 Knowledge graph:
//! - [`limiter::TokenBucket`]: the byte budget. One per run, shared by `Arc`.
//! - [`throttled_reader::ThrottledReader`]: an `AsyncRead` wrapper that pays for every byte.
//! - [`context::OperationContext`]: cancellation + deadline, threaded into every wait.
//! - [`uploader::upload`]: file → reader → channel → backend, with one honest verdict at the end.
//! - [`backends`]: S3, local files, or RAM. Same trait, different amounts of AWS billing.

use std::sync::Arc;

use anyhow::Context;

pub mod app_config;
pub mod backends;
pub mod context;
pub mod limiter;
pub mod throttled_reader;
pub mod uploader;

mod progress;
mod workers;

pub use context::{ContextError, OperationContext};
pub use limiter::{LimiterError, TokenBucket};
pub use throttled_reader::{ThrottledReadError, ThrottledReader};
pub use uploader::{UploadError, UploadReceipt, UploadRequest, upload};

use crate::app_config::AppConfig;
use crate::backends::SinkBackend;

/// 🚀 Load it, do it: one upload, as the config describes, with no outside way to stop it
/// short of the configured timeout.
pub async fn run(app_config: AppConfig) -> Result<UploadReceipt, UploadError> {
    run_with_context(&app_config, &OperationContext::background()).await
}

/// 🚀 Like [`run`], but the upload's context is a child of `parent`. Cancel `parent`
/// (on ctrl-c, say) and the upload stops at its next wait.
pub async fn run_with_context(
    app_config: &AppConfig,
    parent: &OperationContext,
) -> Result<UploadReceipt, UploadError> {
    let limiter = Arc::new(
        app_config
            .throttle
            .build_limiter()
            .context("💀 the [throttle] section doesn't describe a usable token bucket")?,
    );
    let ctx = app_config.runtime.operation_context(parent);
    let mut sink = SinkBackend::from_config(&app_config.sink_config)
        .await
        .context("💀 could not build the storage backend")?;
    let request = UploadRequest::from(&app_config.upload);

    upload(&ctx, &request, limiter, &mut sink, &app_config.runtime).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::app_config::{RuntimeConfig, SinkConfig, ThrottleConfig, UploadConfig};
    use crate::backends::FileSinkConfig;

    fn app_config_for(file: &tempfile::NamedTempFile, root: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            upload: UploadConfig {
                file_name: file.path().to_path_buf(),
                bucket: "bkt".to_string(),
                key: "obj".to_string(),
            },
            throttle: ThrottleConfig::default(),
            runtime: RuntimeConfig {
                show_progress: false,
                ..RuntimeConfig::default()
            },
            sink_config: SinkConfig::File(FileSinkConfig {
                root_dir: root.path().to_path_buf(),
            }),
        }
    }

    #[tokio::test]
    async fn the_one_where_run_goes_from_config_to_object() {
        let mut file = tempfile::NamedTempFile::new().expect("💀 temp file");
        file.write_all(b"slow and steady").expect("💀 write");
        let root = tempfile::tempdir().expect("💀 tempdir");

        let receipt = run(app_config_for(&file, &root))
            .await
            .expect("💀 run should upload the file");

        assert_eq!(receipt.bytes_uploaded, 15);
        assert_eq!(receipt.target.to_string(), "bkt/obj");
        let on_disk = std::fs::read(root.path().join("bkt/obj")).expect("💀 read back");
        assert_eq!(on_disk, b"slow and steady");
    }

    #[tokio::test]
    async fn the_one_where_a_cancelled_parent_stops_the_run() {
        let mut file = tempfile::NamedTempFile::new().expect("💀 temp file");
        file.write_all(b"never arrives").expect("💀 write");
        let root = tempfile::tempdir().expect("💀 tempdir");
        let parent = OperationContext::background();
        parent.cancel();

        let err = run_with_context(&app_config_for(&file, &root), &parent)
            .await
            .expect_err("💀 a cancelled parent means no upload");

        assert!(err.is_interrupted());
        assert!(!root.path().join("bkt/obj").exists());
    }

    #[tokio::test]
    async fn the_one_where_a_broken_throttle_fails_before_touching_anything() {
        let file = tempfile::NamedTempFile::new().expect("💀 temp file");
        let root = tempfile::tempdir().expect("💀 tempdir");
        let mut app_config = app_config_for(&file, &root);
        app_config.throttle.burst_bytes = 0;

        let err = run(app_config).await.expect_err("💀 zero burst is not a bucket");

        assert!(!err.is_interrupted());
        assert!(format!("{err:#}").contains("burst capacity"));
    }
}
