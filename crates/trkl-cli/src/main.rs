//! 🚀 trkl-cli: the front door. Takes a file, a bucket and a key, and uploads politely.
//!
//! 📦 This binary is the thin wrapper that parses flags, loads config, sets up logging,
//! wires ctrl-c to the upload's context, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trkl::app_config::{ConfigOverrides, load_config};
use trkl::{ContextError, OperationContext, UploadError};

/// 🐢 Upload a file to S3 (or something S3-shaped) without melting the disk.
#[derive(Debug, Parser)]
#[command(name = "trkl", version, about)]
struct Cli {
    /// TOML config file. Env vars (TRKL_*) and flags are layered around it.
    config: Option<PathBuf>,

    /// Bucket to upload into
    #[arg(short = 'b', long)]
    bucket: Option<String>,

    /// Object key to upload as
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Local file to upload
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// Give up after this many seconds (0 = never)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Sustained throughput, in bytes per second
    #[arg(long)]
    rate: Option<f64>,

    /// Largest single burst, in bytes
    #[arg(long)]
    burst: Option<usize>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            file_name: self.path.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            timeout_secs: self.timeout_secs,
            rate_bytes_per_sec: self.rate,
            burst_bytes: self.burst,
        }
    }
}

/// 📣 The one line a human reads when it didn't work. A ctrl-c is not a timeout.
fn failure_message(err: &UploadError) -> String {
    match err.interruption() {
        Some(ContextError::Cancelled) => format!("upload canceled, {err}"),
        Some(ContextError::DeadlineExceeded) => format!("upload canceled due to timeout, {err}"),
        None => format!("failed to upload object, {err}"),
    }
}

/// 🚀 main(): where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse flags and load config (the moment of truth)
/// 3. Upload, with ctrl-c wired to cancel
/// 4. Report the verdict, exit 1 if it wasn't a happy one
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 A config file that was asked for but isn't there is a typo, not a default
    if let Some(config_file) = &cli.config {
        let exists = config_file.try_exists().context(format!(
            "💀 couldn't check whether '{}' exists. Permissions, maybe?",
            config_file.display()
        ))?;
        if !exists {
            bail!(
                "💀 configuration file '{}' doesn't exist. If it's a relative path, \
                 double check the working directory, or just use an absolute path.",
                config_file.display()
            );
        }
    }

    let app_config = load_config(cli.config.as_deref(), &cli.overrides()).context(
        "💀 couldn't load the configuration. Bucket, key and path have to come from \
         somewhere: a flag, the config file, or TRKL_UPLOAD__* env vars.",
    )?;

    // 🛑 ctrl-c cancels the upload's context; the upload stops at its next wait
    let ctx = OperationContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 ctrl-c received, cancelling the upload");
            canceller.cancel();
        }
    });

    match trkl::run_with_context(&app_config, &ctx).await {
        Ok(receipt) => {
            println!("successfully uploaded file to {}", receipt.target);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", failure_message(&err));
            // -- 🧅 peel the onion of sadness, one layer at a time
            let err = anyhow::Error::new(err);
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
