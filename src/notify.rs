use crate::failure::Failure;

pub trait Notifier: Send + Sync {
    /// Terminal download failure. Never called for retries or cancellation.
    fn download_failed(&self, failure: &Failure);
    fn verification_started(&self, filename: &str);
    fn verification_finished(&self, filename: &str, result: &Result<String, Failure>);
}

/// Reports through `tracing`.
#[derive(Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn download_failed(&self, failure: &Failure) {
        tracing::error!(
            reason = failure.reason_code(),
            url = failure.url.as_deref().unwrap_or_default(),
            filename = failure.filename.as_deref().unwrap_or_default(),
            "Download failed: {}",
            failure
        );
    }

    fn verification_started(&self, filename: &str) {
        tracing::info!(filename, "Verifying download");
    }

    fn verification_finished(&self, filename: &str, result: &Result<String, Failure>) {
        match result {
            Ok(hash) => tracing::info!(filename, sha256 = %hash, "Verification succeeded"),
            Err(failure) => {
                tracing::error!(filename, reason = failure.reason_code(), "Verification failed: {}", failure)
            }
        }
    }
}
