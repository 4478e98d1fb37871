use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, TimeZone};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use otadl::config::{CONNECT_TIMEOUT, USER_AGENT};
use otadl::tracker::{KEY_BYTES_DONE, KEY_TOTAL_BYTES, KEY_UPDATED_AT};
use otadl::utils::{get_filename_from_url, sanitize_filename, state_path};
use otadl::{
    run_to_completion, DownloadPaths, DownloadWorker, Failure, HttpSource, JsonFileStore, LogNotifier, Notifier,
    ProgressSink, ProgressUpdate, UpdateDescriptor, VerificationRunner, VerifyMode, WorkOutcome, WorkerConfig,
    VERIFICATION_WORK_NAME,
};

/// What the user asked to download, before validation.
pub struct DownloadRequest {
    pub url: Option<String>,
    pub descriptor: Option<PathBuf>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub download_dir: PathBuf,
}

/// Command-line values win over the descriptor file.
pub fn build_descriptor(request: &DownloadRequest) -> Result<UpdateDescriptor> {
    let mut descriptor = match &request.descriptor {
        Some(path) => UpdateDescriptor::from_json_file(path)
            .with_context(|| format!("Failed to load descriptor {:?}", path))?,
        None => UpdateDescriptor::default(),
    };

    if let Some(url) = &request.url {
        descriptor.download_url = Some(url.clone());
    }
    if let Some(filename) = &request.filename {
        descriptor.filename = Some(filename.clone());
    }
    if let Some(size) = request.size {
        descriptor.download_size = size;
    }
    if let Some(checksum) = &request.checksum {
        descriptor.checksum = Some(checksum.clone());
    }

    if descriptor.filename.is_none() {
        if let Some(url) = &descriptor.download_url {
            descriptor.filename = get_filename_from_url(url).ok();
        }
    }
    descriptor.filename = descriptor.filename.as_deref().map(sanitize_filename);

    Ok(descriptor)
}

struct BarProgress {
    pb: ProgressBar,
}

const BAR_TEMPLATE: &str = concat!(
    "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] ",
    "{bytes:>12}/{total_bytes:<12} {percent:>3}% {msg}",
);

impl BarProgress {
    fn new(filename: &str, total: u64) -> Self {
        let pb = ProgressBar::new(total);
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_prefix(filename.to_string());
        Self { pb }
    }
}

impl ProgressSink for BarProgress {
    fn publish(&self, update: &ProgressUpdate) {
        if update.total_bytes > 0 {
            self.pb.set_length(update.total_bytes);
        }
        self.pb.set_position(update.bytes_done);
        match update.eta {
            Some(eta) => self.pb.set_message(format!("ETA {}", HumanDuration(eta))),
            None => self.pb.set_message("ETA unknown"),
        }
    }
}

pub async fn run_download(request: DownloadRequest, config: WorkerConfig) -> Result<()> {
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let descriptor = build_descriptor(&request)?;

    let update = match descriptor.validate() {
        Ok(update) => update,
        Err(failure) => {
            notifier.download_failed(&failure);
            return Err(failure.into());
        }
    };
    if matches!(config.verify_mode, VerifyMode::On) && update.checksum.is_none() {
        let failure = Failure::null_input("verification is on but no checksum was given");
        notifier.download_failed(&failure);
        return Err(failure.into());
    }

    if !request.download_dir.exists() {
        fs::create_dir_all(&request.download_dir)
            .await
            .context("Failed to create download directory")?;
    }

    let paths = DownloadPaths::in_dir(&request.download_dir, &update.filename);
    let store = JsonFileStore::new(state_path(&paths.destination));
    let source = HttpSource::new(USER_AGENT, CONNECT_TIMEOUT);
    let bar = Arc::new(BarProgress::new(&update.filename, update.download_size));
    let runner = Arc::new(VerificationRunner::new(notifier.clone()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let filename = update.filename.clone();
    let mut worker = DownloadWorker::new(update, paths, source, store, config)
        .with_progress(bar.clone())
        .with_notifier(notifier)
        .with_verification(runner.clone())
        .with_cancellation(cancel);

    let outcome = run_to_completion(&mut worker).await;
    match outcome {
        WorkOutcome::Succeeded(path) => {
            bar.pb.finish_with_message(format!("Completed   {}", filename));
            if let Some(result) = runner.wait(VERIFICATION_WORK_NAME).await {
                let hash = result?;
                println!("Verified    {} (SHA256: {})", path.display(), hash);
            } else {
                println!("Saved       {}", path.display());
            }
            Ok(())
        }
        WorkOutcome::Cancelled => {
            bar.pb.abandon_with_message(format!("Paused      {}", filename));
            Ok(())
        }
        WorkOutcome::Failed(failure) => {
            bar.pb.abandon_with_message(format!("Failed      {}", filename));
            Err(failure.into())
        }
        WorkOutcome::Retry => bail!("scheduler stopped while a retry was pending"),
    }
}

pub async fn list_downloads(output: PathBuf) -> Result<()> {
    if !output.exists() {
        println!("Download directory '{:?}' does not exist.", output);
        println!("Tip: If you used a custom download directory, please specify it with --download-dir");
        return Ok(());
    }

    println!("{:<50} {:<12} {:<10} {:<12} {:<17}", "Filename", "Status", "Progress", "Size", "Updated");
    println!("{:-<50} {:-<12} {:-<10} {:-<12} {:-<17}", "", "", "", "", "");

    let mut found_any = false;
    let mut entries = fs::read_dir(&output).await.context("Failed to read download directory")?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if let Some(filename) = name.strip_suffix(".part.json") {
            let values = JsonFileStore::new(&path).read_all();
            let done = values.get(KEY_BYTES_DONE).copied().unwrap_or(0).max(0) as u64;
            let total = values.get(KEY_TOTAL_BYTES).copied().unwrap_or(0).max(0) as u64;
            let progress = if total > 0 {
                (done as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let updated = values
                .get(KEY_UPDATED_AT)
                .and_then(|ts| Local.timestamp_opt(*ts, 0).single())
                .map(|t: DateTime<Local>| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();

            println!(
                "{:<50} {:<12} {:<10} {:<12} {:<17}",
                filename,
                "Resumable",
                format!("{:.2}%", progress),
                format!("{}", HumanBytes(total)),
                updated
            );
            found_any = true;
        } else if !name.ends_with(".part") && !name.ends_with(".json.tmp") && name != ".DS_Store" {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                let updated = metadata
                    .modified()
                    .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<50} {:<12} {:<10} {:<12} {:<17}",
                    name,
                    "Completed",
                    "100.00%",
                    format!("{}", HumanBytes(metadata.len())),
                    updated
                );
                found_any = true;
            }
        }
    }

    if !found_any {
        println!("No resumable or completed downloads found in '{:?}'.", output);
    }

    Ok(())
}
