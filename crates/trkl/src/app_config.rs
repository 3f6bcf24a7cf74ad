//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with a speed limit.
//!
//! 📡 Three layers, lowest to highest:
//!   1. `TRKL_*` env vars (`TRKL_UPLOAD__BUCKET` → `upload.bucket`)
//!   2. an optional TOML file
//!   3. CLI flags, which always win. The person typing gets the last word.
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of. 🦆

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{FileSinkConfig, S3SinkConfig};
use crate::context::OperationContext;
use crate::limiter::{LimiterError, TokenBucket};

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub upload: UploadConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sink_config: SinkConfig,
}

/// 🎯 What goes where. No defaults: guessing a bucket name is how careers end.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UploadConfig {
    #[serde(alias = "path")]
    pub file_name: PathBuf,
    pub bucket: String,
    pub key: String,
}

/// 🐢 The speed limit. Bytes per second, and how many bytes may go out in one gulp.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ThrottleConfig {
    #[serde(default = "default_rate_bytes_per_sec")]
    pub rate_bytes_per_sec: f64,
    #[serde(default = "default_burst_bytes")]
    pub burst_bytes: usize,
}

// -- 📏 ~200 MB/s sustained. fast enough to be useful, slow enough that the NIC can still breathe.
const DEFAULT_RATE_BYTES_PER_SEC: f64 = 200_000_000.0;
// -- 🧱 a second's worth of rate plus eight 8 KiB read buffers of slack
const DEFAULT_BURST_BYTES: usize = 200_000_000 + 8 * 8192;

fn default_rate_bytes_per_sec() -> f64 {
    DEFAULT_RATE_BYTES_PER_SEC
}

fn default_burst_bytes() -> usize {
    DEFAULT_BURST_BYTES
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_bytes_per_sec: default_rate_bytes_per_sec(),
            burst_bytes: default_burst_bytes(),
        }
    }
}

impl ThrottleConfig {
    /// 🪣 A fresh, full bucket built from these knobs.
    pub fn build_limiter(&self) -> Result<TokenBucket, LimiterError> {
        TokenBucket::new(self.rate_bytes_per_sec, self.burst_bytes)
    }
}

/// ⚙️ How the pipeline itself behaves, independent of where the bytes end up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// ⏰ whole-upload deadline in seconds. `0` = no deadline at all.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 📖 bytes asked of the disk per throttled read
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
    /// 🚿 chunks allowed in flight between the reader and the backend
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_timeout_secs() -> u64 {
    // -- ⏳ a bit over 27 hours. long enough for a big file at a tight rate.
    100_000
}

fn default_read_buffer_bytes() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    2
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            read_buffer_bytes: default_read_buffer_bytes(),
            queue_capacity: default_queue_capacity(),
            show_progress: default_show_progress(),
        }
    }
}

impl RuntimeConfig {
    /// ⏰ The upload's context: a child of `parent`, with the configured deadline if there is one.
    pub fn operation_context(&self, parent: &OperationContext) -> OperationContext {
        match self.timeout_secs {
            0 => parent.child(),
            secs => parent.child_with_timeout(Duration::from_secs(secs)),
        }
    }
}

/// 🔌 Which backend swallows the object.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum SinkConfig {
    S3(S3SinkConfig),
    File(FileSinkConfig),
    InMemory,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::S3(S3SinkConfig::default())
    }
}

/// 🎛️ Values from the command line. `None` = "didn't say", so the lower layers decide.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub file_name: Option<PathBuf>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub rate_bytes_per_sec: Option<f64>,
    pub burst_bytes: Option<usize>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(file_name) = &self.file_name {
            figment = figment.merge(Serialized::default("upload.file_name", file_name));
        }
        if let Some(bucket) = &self.bucket {
            figment = figment.merge(Serialized::default("upload.bucket", bucket));
        }
        if let Some(key) = &self.key {
            figment = figment.merge(Serialized::default("upload.key", key));
        }
        if let Some(timeout_secs) = self.timeout_secs {
            figment = figment.merge(Serialized::default("runtime.timeout_secs", timeout_secs));
        }
        if let Some(rate) = self.rate_bytes_per_sec {
            figment = figment.merge(Serialized::default("throttle.rate_bytes_per_sec", rate));
        }
        if let Some(burst) = self.burst_bytes {
            figment = figment.merge(Serialized::default("throttle.burst_bytes", burst));
        }
        figment
    }
}

/// 🚀 Load the config: env vars, then the TOML file if one was given, then CLI overrides.
///
/// 📐 No file means env + flags only. We don't go hunting for a `trkl.toml` nobody asked for.
///
/// 💀 Returns an error if a required field is missing from every layer, or something won't parse.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("TRKL_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };
    let config = overrides.apply(config);

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (TRKL_*) \
             and command line flags.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TRKL_*) and \
                 command line flags. No file was provided, so the bucket has to come from somewhere."
            .to_string(),
    };

    config.extract().context(context_msg)
}
