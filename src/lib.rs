//! Resumable OTA update downloader.
//!
//! A [`DownloadWorker`] fetches one update package with HTTP range
//! resumption, persisting its offset through an injected [`StateStore`].
//! [`run_to_completion`] re-runs it with linear backoff until it succeeds,
//! fails for good or is cancelled. Finished files are moved into place and
//! handed to a [`VerificationQueue`] for checksum verification.

pub mod cli;
pub mod config;
pub mod descriptor;
pub mod downloader;
pub mod failure;
pub mod handoff;
pub mod notify;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod tracker;
pub mod utils;
pub mod verify;

pub use cli::VerifyMode;
pub use config::WorkerConfig;
pub use descriptor::{UpdateDescriptor, ValidatedUpdate};
pub use downloader::{plan_resume, DownloadPaths, DownloadWorker, ResumePlan, WorkOutcome, WorkerState};
pub use failure::{Failure, FailureKind};
pub use handoff::{move_file, VerificationQueue, VerificationRunner, VERIFICATION_WORK_NAME};
pub use notify::{LogNotifier, Notifier};
pub use progress::{ProgressEstimator, ProgressSink, ProgressUpdate};
pub use retry::{classify, ErrorClass, RetryDecision, RetryPolicy};
pub use scheduler::run_to_completion;
pub use source::{ByteStream, DownloadSource, HttpSource, SourceResponse, TransferError};
pub use tracker::{JsonFileStore, MemoryStore, StateStore, TransferState, TransferTracker, NOT_SET};
pub use verify::VerificationTask;
