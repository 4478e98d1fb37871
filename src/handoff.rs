//! Moving a finished download into place and queueing its verification.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::task::JoinHandle;

use crate::failure::Failure;
use crate::notify::Notifier;
use crate::verify::{self, VerificationTask};

/// Unique work name shared by every verification run.
pub const VERIFICATION_WORK_NAME: &str = "ota-verification";

/// Renames `from` to `to`, falling back to copy-then-delete when the rename
/// fails (for example across filesystems). The source is only removed once
/// the destination is confirmed on disk.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!(from = %from.display(), to = %to.display(), error = %e, "Rename failed, copying instead");
            copy_then_remove(from, to).await
        }
    }
}

/// Copies `from` to `to` and removes `from` once `to` exists.
pub(crate) async fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).await?;
    if fs::metadata(to).await.is_err() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} missing after copy", to.display()),
        ));
    }
    fs::remove_file(from).await
}

/// Downstream queue with unique-work semantics: enqueuing under a name that
/// is already queued replaces the earlier task.
pub trait VerificationQueue: Send + Sync {
    fn enqueue_unique(&self, name: &str, task: VerificationTask);
}

type VerificationJob = JoinHandle<Result<String, Failure>>;

/// Runs verification tasks on the tokio runtime.
pub struct VerificationRunner {
    notifier: Arc<dyn Notifier>,
    jobs: Mutex<HashMap<String, VerificationJob>>,
}

impl VerificationRunner {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for the task queued under `name`. `None` when nothing is queued
    /// or the task was replaced before finishing.
    pub async fn wait(&self, name: &str) -> Option<Result<String, Failure>> {
        let job = self.lock().remove(name)?;
        job.await.ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VerificationJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VerificationQueue for VerificationRunner {
    fn enqueue_unique(&self, name: &str, task: VerificationTask) {
        let notifier = self.notifier.clone();
        let job = tokio::spawn(async move {
            notifier.verification_started(&task.filename);
            let result = verify::verify(&task).await;
            notifier.verification_finished(&task.filename, &result);
            result
        });

        if let Some(previous) = self.lock().insert(name.to_string(), job) {
            tracing::debug!(name, "Replacing queued verification");
            previous.abort();
        }
    }
}
