//! 🪣 S3Sink: the real destination. Streams the throttled body straight into `PutObject`.
//!
//! 🧠 The body is never buffered whole. The read worker feeds a bounded channel, the channel
//! becomes an `http_body` stream, and the SDK pulls frames as fast as the token bucket allows.
//! Because the body is a one-shot stream, the SDK can't replay it: a failed request is a
//! failed upload. No retries, no partial objects.
//!
//! Any S3-compatible endpoint works (MinIO, LocalStack, that one Ceph cluster nobody owns)
//! via `endpoint_url` + `force_path_style`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{config::Region, primitives::ByteStream};
use futures::StreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::{ObjectSink, ObjectTarget, UploadBody};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct S3SinkConfig {
    /// 🌍 defaults to "eu-west-1", where the bucket in the very first version of this tool lived
    #[serde(default = "default_s3_region")]
    pub region: String,
    /// 🔧 custom endpoint for S3-compatible stores. `None` = real AWS.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_s3_region() -> String {
    "eu-west-1".to_string()
}

impl Default for S3SinkConfig {
    fn default() -> Self {
        Self {
            region: default_s3_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

pub struct S3Sink {
    client: aws_sdk_s3::Client,
    sink_config: S3SinkConfig,
}

impl std::fmt::Debug for S3Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🙈 the client carries credentials. it stays out of the logs.
        f.debug_struct("S3Sink")
            .field("sink_config", &self.sink_config)
            .finish_non_exhaustive()
    }
}

impl S3Sink {
    /// 🚀 Builds an S3 client from the environment (env vars, ~/.aws/config, IAM role),
    /// pinned to the configured region and optionally pointed at a custom endpoint.
    pub async fn new(sink_config: S3SinkConfig) -> Result<Self> {
        let the_aws_config = aws_config::from_env()
            .region(Region::new(sink_config.region.clone()))
            .load()
            .await;
        Ok(Self::from_s3_config(
            aws_sdk_s3::config::Builder::from(&the_aws_config),
            sink_config,
        ))
    }

    /// 🔧 Finishes an S3 config (path style, endpoint override) and builds the client from it.
    fn from_s3_config(the_s3_config: aws_sdk_s3::config::Builder, sink_config: S3SinkConfig) -> Self {
        let mut the_s3_config = the_s3_config.force_path_style(sink_config.force_path_style);
        if let Some(endpoint_url) = &sink_config.endpoint_url {
            debug!("🔧 S3 endpoint overridden to {endpoint_url}");
            the_s3_config = the_s3_config.endpoint_url(endpoint_url);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(the_s3_config.build()),
            sink_config,
        }
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn put_object(
        &mut self,
        target: &ObjectTarget,
        body: UploadBody,
        content_length: u64,
    ) -> Result<()> {
        let the_content_length = i64::try_from(content_length)
            .context(format!("💀 {content_length} bytes is too big for a single PutObject"))?;

        // -- 🚿 channel → frames → http body. an Err chunk aborts the request mid-flight.
        let the_body = StreamBody::new(body.map(|chunk| chunk.map(Frame::data)));

        debug!(
            "🪣 PutObject {} ({} bytes) in {}",
            target, content_length, self.sink_config.region
        );
        self.client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_length(the_content_length)
            .body(ByteStream::from_body_1_x(the_body))
            .send()
            .await
            .context(format!(
                "💀 PutObject failed for s3://{target}. Check: bucket name, region, and credentials."
            ))?;

        info!("🪣 uploaded {} bytes to s3://{}", content_length, target);
        Ok(())
    }
}
