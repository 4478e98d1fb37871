mod commands;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use otadl::{RetryPolicy, VerifyMode, WorkerConfig};

use crate::commands::DownloadRequest;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Update package URL (overrides the descriptor's downloadUrl)
    #[arg(index = 1)]
    url: Option<String>,

    /// JSON update descriptor (downloadUrl, filename, downloadSize, checksum, versions)
    #[arg(short = 'D', long)]
    descriptor: Option<PathBuf>,

    /// Name of the downloaded file (defaults to the last URL segment)
    #[arg(short = 'n', long)]
    filename: Option<String>,

    /// Advertised size in bytes, used for progress and sanity checks
    #[arg(short = 's', long)]
    size: Option<u64>,

    /// Expected SHA-256 of the package
    #[arg(short = 'c', long)]
    checksum: Option<String>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// Retries allowed for network and I/O errors before giving up
    #[arg(long, default_value_t = otadl::retry::DEFAULT_MAX_ATTEMPTS)]
    max_retries: u32,

    /// Base delay of the linear retry backoff, in seconds
    #[arg(long, default_value_t = otadl::retry::DEFAULT_BACKOFF_BASE.as_secs())]
    backoff_secs: u64,

    /// Minimum time between progress updates, in milliseconds
    #[arg(long, default_value_t = 1000)]
    progress_interval_ms: u64,

    /// Hash verification: auto (only when a checksum is provided), on (require checksum), off (skip)
    #[arg(long = "verify-hash", value_enum, default_value = "auto")]
    verify_hash: VerifyMode,

    /// List resumable and completed downloads in the download directory
    #[arg(short = 'l', long)]
    list: bool,
}

impl Args {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                backoff_base: Duration::from_secs(self.backoff_secs),
            },
            rate_limit: self.rate_limit,
            verify_mode: self.verify_hash,
            ..WorkerConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = Args::parse();

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;

    if args.list {
        return rt.block_on(crate::commands::list_downloads(args.download_dir));
    }

    let config = args.worker_config();
    let request = DownloadRequest {
        url: args.url,
        descriptor: args.descriptor,
        filename: args.filename,
        size: args.size,
        checksum: args.checksum,
        download_dir: args.download_dir,
    };
    rt.block_on(crate::commands::run_download(request, config))
}
