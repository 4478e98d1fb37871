//! Range-resume download worker.
//!
//! One worker owns one download. Each call to [`DownloadWorker::run_attempt`]
//! moves it from `Idle` through `Downloading` into a terminal or retrying
//! state; the scheduler decides whether to call it again.

use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::descriptor::ValidatedUpdate;
use crate::failure::{Failure, FailureKind};
use crate::handoff::{self, VerificationQueue, VERIFICATION_WORK_NAME};
use crate::notify::{LogNotifier, Notifier};
use crate::progress::{NullProgress, ProgressEstimator, ProgressSink, ProgressUpdate};
use crate::retry::{self, RetryDecision};
use crate::source::{DownloadSource, TransferError};
use crate::tracker::{StateStore, TransferState, TransferTracker};
use crate::utils::partial_path;
use crate::verify::VerificationTask;

const HTTP_OK: u16 = 200;
const HTTP_RANGE_NOT_SATISFIABLE: u16 = 416;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Downloading,
    Succeeded,
    Retrying,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Succeeded(PathBuf),
    Retry,
    Failed(Failure),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    Fresh,
    Resume { offset: u64 },
    /// Persisted offset points past the end of the partial file.
    Restart { bytes_done: u64, partial_len: u64 },
}

impl ResumePlan {
    pub fn offset(&self) -> u64 {
        match self {
            ResumePlan::Resume { offset } => *offset,
            ResumePlan::Fresh | ResumePlan::Restart { .. } => 0,
        }
    }

    pub fn range_start(&self) -> Option<u64> {
        match self {
            ResumePlan::Resume { offset } => Some(*offset),
            ResumePlan::Fresh | ResumePlan::Restart { .. } => None,
        }
    }
}

/// Longer partial files are resumed as-is; their tail is overwritten or
/// trimmed once the transfer finishes.
pub fn plan_resume(state: &TransferState, partial_len: u64) -> ResumePlan {
    if !state.is_resumable() || state.bytes_done < 0 {
        return ResumePlan::Fresh;
    }
    let bytes_done = state.bytes_done as u64;
    if partial_len < bytes_done {
        ResumePlan::Restart { bytes_done, partial_len }
    } else {
        ResumePlan::Resume { offset: bytes_done }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadPaths {
    pub destination: PathBuf,
    pub partial: PathBuf,
}

impl DownloadPaths {
    pub fn in_dir(dir: &Path, filename: &str) -> Self {
        let destination = dir.join(filename);
        Self {
            partial: partial_path(&destination),
            destination,
        }
    }
}

enum AttemptError {
    Cancelled,
    Failed(Failure),
    Transfer(TransferError),
}

impl From<TransferError> for AttemptError {
    fn from(err: TransferError) -> Self {
        AttemptError::Transfer(err)
    }
}

impl From<std::io::Error> for AttemptError {
    fn from(err: std::io::Error) -> Self {
        AttemptError::Transfer(TransferError::Io(err))
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct DownloadWorker<Src, St> {
    update: ValidatedUpdate,
    paths: DownloadPaths,
    source: Src,
    tracker: TransferTracker<St>,
    config: WorkerConfig,
    progress: Arc<dyn ProgressSink>,
    notifier: Arc<dyn Notifier>,
    verification: Option<Arc<dyn VerificationQueue>>,
    cancel: CancellationToken,
    rate_limiter: Option<(Limiter, u32)>,
    state: WorkerState,
}

impl<Src: DownloadSource, St: StateStore> DownloadWorker<Src, St> {
    pub fn new(update: ValidatedUpdate, paths: DownloadPaths, source: Src, store: St, config: WorkerConfig) -> Self {
        let rate_limiter = config
            .rate_limit
            .and_then(NonZeroU32::new)
            .map(|limit| (RateLimiter::direct(Quota::per_second(limit)), limit.get()));

        Self {
            update,
            paths,
            source,
            tracker: TransferTracker::new(store),
            config,
            progress: Arc::new(NullProgress),
            notifier: Arc::new(LogNotifier),
            verification: None,
            cancel: CancellationToken::new(),
            rate_limiter,
            state: WorkerState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_verification(mut self, queue: Arc<dyn VerificationQueue>) -> Self {
        self.verification = Some(queue);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn paths(&self) -> &DownloadPaths {
        &self.paths
    }

    pub fn tracker(&self) -> &TransferTracker<St> {
        &self.tracker
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs one attempt. `attempt` is the number of earlier runs of this work.
    pub async fn run_attempt(&mut self, attempt: u32) -> WorkOutcome {
        if self.cancel.is_cancelled() {
            self.state = WorkerState::Cancelled;
            return WorkOutcome::Cancelled;
        }

        self.state = WorkerState::Downloading;
        tracing::info!(url = %self.update.download_url, attempt, "Starting download attempt");

        let outcome = match self.transfer().await {
            Ok(written) => match self.complete(written).await {
                Ok(path) => WorkOutcome::Succeeded(path),
                Err(failure) => WorkOutcome::Failed(failure),
            },
            Err(AttemptError::Cancelled) => WorkOutcome::Cancelled,
            Err(AttemptError::Failed(failure)) => WorkOutcome::Failed(failure),
            Err(AttemptError::Transfer(err)) => self.handle_transfer_error(err, attempt).await,
        };

        self.state = match &outcome {
            WorkOutcome::Succeeded(_) => WorkerState::Succeeded,
            WorkOutcome::Retry => WorkerState::Retrying,
            WorkOutcome::Failed(_) => WorkerState::Failed,
            WorkOutcome::Cancelled => WorkerState::Cancelled,
        };

        match outcome {
            WorkOutcome::Failed(failure) => {
                let failure = self.update.annotate(failure);
                self.notifier.download_failed(&failure);
                WorkOutcome::Failed(failure)
            }
            WorkOutcome::Cancelled => {
                tracing::info!(filename = %self.update.filename, "Download stopped, progress kept");
                WorkOutcome::Cancelled
            }
            other => other,
        }
    }

    async fn handle_transfer_error(&self, err: TransferError, attempt: u32) -> WorkOutcome {
        let class = retry::classify(&err, self.cancel.is_cancelled());
        match self.config.retry.decide(class, attempt) {
            RetryDecision::Cancelled => WorkOutcome::Cancelled,
            RetryDecision::Retry => {
                tracing::warn!(attempt, error = %err, "Transfer interrupted, will retry");
                WorkOutcome::Retry
            }
            RetryDecision::GiveUp(kind) => {
                tracing::error!(attempt, error = %err, "Giving up after {} attempts", attempt + 1);
                WorkOutcome::Failed(Failure::new(kind).with_detail(err.to_string()))
            }
            RetryDecision::Reset => {
                tracing::error!(error = %err, "Unexpected transfer error, discarding partial download");
                if let Err(e) = self.tracker.clear() {
                    tracing::warn!(error = %e, "Failed to clear transfer state");
                }
                if let Err(e) = fs::remove_file(&self.paths.partial).await {
                    tracing::debug!(error = %e, "No partial file to remove");
                }
                WorkOutcome::Failed(Failure::new(FailureKind::Unknown).with_detail(err.to_string()))
            }
        }
    }

    /// Streams the body into the partial file and returns its final length.
    async fn transfer(&self) -> Result<u64, AttemptError> {
        let saved = self.tracker.load()?;
        let partial_len = match fs::metadata(&self.paths.partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let plan = plan_resume(&saved, partial_len);
        match plan {
            ResumePlan::Resume { offset } if partial_len > offset => {
                tracing::warn!(offset, partial_len, "Partial file is longer than the saved offset, resuming anyway");
            }
            ResumePlan::Resume { offset } => tracing::info!(offset, "Resuming download"),
            ResumePlan::Restart { bytes_done, partial_len } => {
                tracing::warn!(bytes_done, partial_len, "Partial file is shorter than the saved offset, restarting");
                self.tracker.clear()?;
            }
            ResumePlan::Fresh => {}
        }

        let url = self.update.download_url.clone();
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
            response = self.source.open(&url, plan.range_start()) => response?,
        };

        let mut offset = plan.offset();
        let success = response.is_success();
        let body = match response.body {
            Some(body) if success => body,
            _ => {
                if response.status == HTTP_RANGE_NOT_SATISFIABLE {
                    self.tracker.clear()?;
                }
                return Err(AttemptError::Failed(Failure::unsuccessful_response(
                    url,
                    response.status,
                    response.message,
                )));
            }
        };

        if offset > 0 && response.status == HTTP_OK {
            tracing::warn!(offset, "Server ignored the range request, restarting from zero");
            offset = 0;
        }

        let total = match response.content_length {
            Some(len) => {
                let reported = len + offset;
                let expected = self.update.download_size;
                if expected > 0 && reported.abs_diff(expected) > self.config.size_tolerance {
                    tracing::warn!(reported, expected, "Reported size differs from the advertised size");
                }
                reported
            }
            None => self.update.download_size,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.paths.partial)
            .await?;
        if offset == 0 {
            file.set_len(0).await?;
        }
        file.seek(SeekFrom::Start(offset)).await?;

        let mut estimator = ProgressEstimator::new(self.config.progress_interval);
        let mut written = offset;
        let mut body = body;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    file.flush().await?;
                    return Err(AttemptError::Cancelled);
                }
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            self.throttle(chunk.len()).await;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(update) = estimator.sample(written, total, Instant::now()) {
                file.flush().await?;
                self.tracker.save(&TransferState {
                    bytes_done: written as i64,
                    total_bytes: total as i64,
                })?;
                tracing::debug!(written, total, eta = ?update.eta, "Progress");
                self.progress.publish(&update);
            }
        }

        file.flush().await?;
        // drop stale bytes left behind by a longer earlier attempt
        file.set_len(written).await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn throttle(&self, len: usize) {
        let Some((limiter, burst)) = &self.rate_limiter else {
            return;
        };
        let mut remaining = u32::try_from(len).unwrap_or(u32::MAX);
        while remaining > 0 {
            let step = remaining.min(*burst);
            if let Some(n) = NonZeroU32::new(step) {
                // step never exceeds the burst size, so capacity is sufficient
                let _ = limiter.until_n_ready(n).await;
            }
            remaining -= step;
        }
    }

    async fn complete(&self, written: u64) -> Result<PathBuf, Failure> {
        if let Err(e) = self.tracker.clear() {
            tracing::warn!(error = %e, "Failed to clear transfer state");
        }
        self.progress.publish(&ProgressUpdate::finished(written));

        handoff::move_file(&self.paths.partial, &self.paths.destination)
            .await
            .map_err(|e| Failure::new(FailureKind::CouldNotMoveTempFile).with_detail(e.to_string()))?;
        tracing::info!(path = %self.paths.destination.display(), bytes = written, "Download complete");

        let checksum = self.update.checksum.as_deref();
        if let Some(queue) = &self.verification {
            if self.config.verify_mode.should_verify(checksum) {
                if let Some(checksum) = checksum {
                    queue.enqueue_unique(
                        VERIFICATION_WORK_NAME,
                        VerificationTask {
                            filename: self.update.filename.clone(),
                            path: self.paths.destination.clone(),
                            checksum: checksum.to_string(),
                        },
                    );
                }
            }
        }

        Ok(self.paths.destination.clone())
    }
}
