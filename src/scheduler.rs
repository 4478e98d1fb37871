use crate::downloader::{DownloadWorker, WorkOutcome};
use crate::source::DownloadSource;
use crate::tracker::StateStore;

/// Re-runs the worker after each `Retry`, sleeping the policy's linear
/// backoff in between. Cancelling during a backoff ends the run.
pub async fn run_to_completion<Src, St>(worker: &mut DownloadWorker<Src, St>) -> WorkOutcome
where
    Src: DownloadSource,
    St: StateStore,
{
    let mut attempt = 0;
    loop {
        match worker.run_attempt(attempt).await {
            WorkOutcome::Retry => {
                let delay = worker.config().retry.backoff(attempt);
                tracing::info!(attempt, delay_secs = delay.as_secs_f64(), "Retry scheduled");
                let cancel = worker.cancellation().clone();
                tokio::select! {
                    _ = cancel.cancelled() => return WorkOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
