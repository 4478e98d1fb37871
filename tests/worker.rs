use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use otadl::tracker::{KEY_BYTES_DONE, KEY_TOTAL_BYTES};
use otadl::{
    run_to_completion, ByteStream, DownloadPaths, DownloadSource, DownloadWorker, Failure, FailureKind, MemoryStore,
    Notifier, ProgressSink, ProgressUpdate, RetryPolicy, SourceResponse, StateStore, TransferError, UpdateDescriptor,
    VerificationQueue, VerificationTask, VerifyMode, WorkOutcome, WorkerConfig, WorkerState, VERIFICATION_WORK_NAME,
};

const URL: &str = "https://ota.example.com/full/update.zip";
const CHUNK: usize = 64;

fn payload() -> Vec<u8> {
    (0..1000u32).map(|i| (i % 251) as u8).collect()
}

#[derive(Clone, Copy)]
enum ErrKind {
    Network,
    Io,
    Other,
}

impl ErrKind {
    fn build(self) -> TransferError {
        match self {
            ErrKind::Network => TransferError::Network("connection reset".into()),
            ErrKind::Io => TransferError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof")),
            ErrKind::Other => TransferError::Other("malformed body".into()),
        }
    }
}

#[derive(Clone, Copy)]
enum Script {
    /// Serve the payload honouring the range, optionally failing after `n` bytes.
    Serve { fail_after: Option<(usize, ErrKind)> },
    /// Serve the full payload with 200 even when a range was asked for.
    IgnoreRange,
    Status(u16),
    FailOpen(ErrKind),
    CancelThenFail,
    /// Serve from zero and cancel the worker while yielding chunk `n`.
    CancelAfter(usize),
}

#[derive(Clone)]
struct FakeSource {
    payload: Arc<Vec<u8>>,
    script: Arc<Mutex<VecDeque<Script>>>,
    fallback: Script,
    requests: Arc<Mutex<Vec<Option<u64>>>>,
    cancel: CancellationToken,
}

impl FakeSource {
    fn new(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            payload: Arc::new(payload()),
            script: Arc::new(Mutex::new(scripts.into())),
            fallback,
            requests: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    fn serving() -> Self {
        Self::new(vec![], Script::Serve { fail_after: None })
    }

    fn requests(&self) -> Vec<Option<u64>> {
        self.requests.lock().unwrap().clone()
    }

    fn body(data: Vec<u8>, fail_after: Option<(usize, ErrKind)>) -> ByteStream {
        let (data, error) = match fail_after {
            Some((n, kind)) => (data[..n.min(data.len())].to_vec(), Some(kind)),
            None => (data, None),
        };
        let mut items: Vec<Result<Bytes, TransferError>> =
            data.chunks(CHUNK).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        if let Some(kind) = error {
            items.push(Err(kind.build()));
        }
        Box::pin(stream::iter(items))
    }
}

#[async_trait::async_trait]
impl DownloadSource for FakeSource {
    async fn open(&self, _url: &str, resume_from: Option<u64>) -> Result<SourceResponse, TransferError> {
        self.requests.lock().unwrap().push(resume_from);
        let script = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);

        match script {
            Script::Serve { fail_after } => {
                let offset = resume_from.unwrap_or(0) as usize;
                let rest = self.payload[offset..].to_vec();
                Ok(SourceResponse {
                    status: if resume_from.is_some() { 206 } else { 200 },
                    message: String::new(),
                    content_length: Some(rest.len() as u64),
                    body: Some(Self::body(rest, fail_after)),
                })
            }
            Script::IgnoreRange => Ok(SourceResponse {
                status: 200,
                message: "OK".into(),
                content_length: Some(self.payload.len() as u64),
                body: Some(Self::body(self.payload.to_vec(), None)),
            }),
            Script::Status(status) => Ok(SourceResponse {
                status,
                message: "Not Found".into(),
                content_length: None,
                body: None,
            }),
            Script::FailOpen(kind) => Err(kind.build()),
            Script::CancelThenFail => {
                self.cancel.cancel();
                Err(TransferError::Other("aborted".into()))
            }
            Script::CancelAfter(n) => {
                let token = self.cancel.clone();
                let items: Vec<Result<Bytes, TransferError>> =
                    self.payload.chunks(CHUNK).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
                let body: ByteStream = Box::pin(stream::iter(items).enumerate().map(move |(i, chunk)| {
                    if i == n {
                        token.cancel();
                    }
                    chunk
                }));
                Ok(SourceResponse {
                    status: 200,
                    message: String::new(),
                    content_length: Some(self.payload.len() as u64),
                    body: Some(body),
                })
            }
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    failures: Mutex<Vec<Failure>>,
}

impl Notifier for RecordingNotifier {
    fn download_failed(&self, failure: &Failure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
    fn verification_started(&self, _filename: &str) {}
    fn verification_finished(&self, _filename: &str, _result: &Result<String, Failure>) {}
}

#[derive(Default)]
struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressSink for RecordingProgress {
    fn publish(&self, update: &ProgressUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

#[derive(Default)]
struct RecordingQueue {
    tasks: Mutex<Vec<(String, VerificationTask)>>,
}

impl VerificationQueue for RecordingQueue {
    fn enqueue_unique(&self, name: &str, task: VerificationTask) {
        self.tasks.lock().unwrap().push((name.to_string(), task));
    }
}

struct Harness {
    worker: DownloadWorker<FakeSource, MemoryStore>,
    source: FakeSource,
    store: MemoryStore,
    notifier: Arc<RecordingNotifier>,
    progress: Arc<RecordingProgress>,
    queue: Arc<RecordingQueue>,
    paths: DownloadPaths,
    _dir: tempfile::TempDir,
}

fn config() -> WorkerConfig {
    WorkerConfig {
        progress_interval: Duration::ZERO,
        retry: RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::ZERO,
        },
        ..WorkerConfig::default()
    }
}

fn harness(source: FakeSource, checksum: Option<&str>, config: WorkerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let update = UpdateDescriptor {
        download_url: Some(URL.into()),
        filename: Some("update.zip".into()),
        download_size: 1000,
        checksum: checksum.map(String::from),
        version_number: Some("Oxygen 14.0".into()),
        ota_version_number: Some("CPH2581_14.0.0.600".into()),
    }
    .validate()
    .unwrap();

    let paths = DownloadPaths::in_dir(dir.path(), "update.zip");
    let store = MemoryStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let progress = Arc::new(RecordingProgress::default());
    let queue = Arc::new(RecordingQueue::default());

    let worker = DownloadWorker::new(update, paths.clone(), source.clone(), store.clone(), config)
        .with_notifier(notifier.clone())
        .with_progress(progress.clone())
        .with_verification(queue.clone())
        .with_cancellation(source.cancel.clone());

    Harness {
        worker,
        source,
        store,
        notifier,
        progress,
        queue,
        paths,
        _dir: dir,
    }
}

fn seed_partial(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn fresh_download_moves_file_and_clears_state() {
    let mut h = harness(FakeSource::serving(), None, config());

    let outcome = h.worker.run_attempt(0).await;

    assert_eq!(outcome, WorkOutcome::Succeeded(h.paths.destination.clone()));
    assert_eq!(h.worker.state(), WorkerState::Succeeded);
    assert_eq!(h.source.requests(), vec![None]);
    assert!(!h.store.contains(KEY_BYTES_DONE));
    assert!(!h.store.contains(KEY_TOTAL_BYTES));
    assert!(!h.paths.partial.exists());
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());

    let updates = h.progress.updates.lock().unwrap();
    assert_eq!(updates.last(), Some(&ProgressUpdate::finished(1000)));
}

#[tokio::test]
async fn resume_seeks_to_saved_offset() {
    let mut h = harness(FakeSource::serving(), None, config());
    seed_partial(&h.paths.partial, &payload()[..320]);
    h.store.put(KEY_BYTES_DONE, 320).unwrap();

    let outcome = h.worker.run_attempt(0).await;

    assert!(matches!(outcome, WorkOutcome::Succeeded(_)));
    assert_eq!(h.source.requests(), vec![Some(320)]);
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());
}

#[tokio::test]
async fn longer_partial_resumes_at_saved_offset_and_drops_stale_tail() {
    let mut h = harness(FakeSource::serving(), None, config());
    let mut partial = payload()[..300].to_vec();
    partial.extend(std::iter::repeat(0xAA).take(900));
    seed_partial(&h.paths.partial, &partial);
    h.store.put(KEY_BYTES_DONE, 300).unwrap();

    let outcome = h.worker.run_attempt(0).await;

    assert!(matches!(outcome, WorkOutcome::Succeeded(_)));
    assert_eq!(h.source.requests(), vec![Some(300)]);
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());
}

#[tokio::test]
async fn shorter_partial_restarts_without_range() {
    let mut h = harness(FakeSource::serving(), None, config());
    seed_partial(&h.paths.partial, &payload()[..50]);
    h.store.put(KEY_BYTES_DONE, 400).unwrap();

    let outcome = h.worker.run_attempt(0).await;

    assert!(matches!(outcome, WorkOutcome::Succeeded(_)));
    assert_eq!(h.source.requests(), vec![None]);
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());
}

#[tokio::test]
async fn ignored_range_restarts_from_zero() {
    let mut h = harness(FakeSource::new(vec![Script::IgnoreRange], Script::IgnoreRange), None, config());
    seed_partial(&h.paths.partial, &payload()[..200]);
    h.store.put(KEY_BYTES_DONE, 200).unwrap();

    let outcome = h.worker.run_attempt(0).await;

    assert!(matches!(outcome, WorkOutcome::Succeeded(_)));
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());
}

#[tokio::test]
async fn network_errors_exhaust_retries_as_server_error() {
    let source = FakeSource::new(vec![], Script::FailOpen(ErrKind::Network));
    let mut h = harness(source, None, config());

    let outcome = run_to_completion(&mut h.worker).await;

    let WorkOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(failure.kind, FailureKind::ServerError);
    assert!(failure.detail.is_some());
    assert_eq!(failure.url, None);
    assert_eq!(failure.filename, None);
    assert_eq!(failure.version, None);
    assert_eq!(failure.ota_version, None);
    // first run plus five retries
    assert_eq!(h.source.requests().len(), 6);
    assert_eq!(h.notifier.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn io_errors_exhaust_retries_as_connection_error() {
    let source = FakeSource::new(vec![], Script::FailOpen(ErrKind::Io));
    let mut h = harness(source, None, config());

    for attempt in 0..5 {
        assert_eq!(h.worker.run_attempt(attempt).await, WorkOutcome::Retry);
        assert_eq!(h.worker.state(), WorkerState::Retrying);
    }
    assert!(h.notifier.failures.lock().unwrap().is_empty());

    let WorkOutcome::Failed(failure) = h.worker.run_attempt(5).await else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, FailureKind::ConnectionError);
}

#[tokio::test]
async fn interrupted_transfer_resumes_where_it_stopped() {
    let source = FakeSource::new(
        vec![Script::Serve {
            fail_after: Some((256, ErrKind::Network)),
        }],
        Script::Serve { fail_after: None },
    );
    let mut h = harness(source, None, config());

    assert_eq!(h.worker.run_attempt(0).await, WorkOutcome::Retry);
    assert_eq!(h.store.get(KEY_BYTES_DONE).unwrap(), Some(256));

    let outcome = h.worker.run_attempt(1).await;

    assert!(matches!(outcome, WorkOutcome::Succeeded(_)));
    assert_eq!(h.source.requests(), vec![None, Some(256)]);
    assert_eq!(std::fs::read(&h.paths.destination).unwrap(), payload());
}

#[tokio::test]
async fn unexpected_error_discards_partial_download() {
    let source = FakeSource::new(
        vec![Script::Serve {
            fail_after: Some((128, ErrKind::Other)),
        }],
        Script::Serve { fail_after: None },
    );
    let mut h = harness(source, None, config());

    let WorkOutcome::Failed(failure) = h.worker.run_attempt(0).await else {
        panic!("expected failure");
    };

    assert_eq!(failure.kind, FailureKind::Unknown);
    assert!(!h.store.contains(KEY_BYTES_DONE));
    assert!(!h.paths.partial.exists());
    assert_eq!(h.notifier.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unsuccessful_response_carries_http_details() {
    let source = FakeSource::new(vec![], Script::Status(404));
    let mut h = harness(source, None, config());

    let WorkOutcome::Failed(failure) = h.worker.run_attempt(0).await else {
        panic!("expected failure");
    };

    assert_eq!(failure.kind, FailureKind::UnsuccessfulResponse);
    assert_eq!(failure.http_code, Some(404));
    assert_eq!(failure.http_message.as_deref(), Some("Not Found"));
    assert_eq!(failure.url.as_deref(), Some(URL));
    assert_eq!(failure.filename.as_deref(), Some("update.zip"));
    assert_eq!(failure.version.as_deref(), Some("Oxygen 14.0"));
    assert_eq!(failure.ota_version.as_deref(), Some("CPH2581_14.0.0.600"));
}

#[tokio::test]
async fn range_not_satisfiable_clears_saved_state() {
    let source = FakeSource::new(vec![], Script::Status(416));
    let mut h = harness(source, None, config());
    seed_partial(&h.paths.partial, &payload());
    h.store.put(KEY_BYTES_DONE, 1000).unwrap();

    let WorkOutcome::Failed(failure) = h.worker.run_attempt(0).await else {
        panic!("expected failure");
    };

    assert_eq!(failure.kind, FailureKind::UnsuccessfulResponse);
    assert_eq!(failure.http_code, Some(416));
    assert_eq!(h.source.requests(), vec![Some(1000)]);
    assert!(!h.store.contains(KEY_BYTES_DONE));
}

#[tokio::test]
async fn blocked_destination_fails_with_could_not_move() {
    let mut h = harness(FakeSource::serving(), None, config());
    std::fs::create_dir(&h.paths.destination).unwrap();
    std::fs::write(h.paths.destination.join("occupied"), b"x").unwrap();

    let WorkOutcome::Failed(failure) = h.worker.run_attempt(0).await else {
        panic!("expected failure");
    };

    assert_eq!(failure.kind, FailureKind::CouldNotMoveTempFile);
    assert!(failure.detail.is_some());
    assert_eq!(failure.url, None);
    assert_eq!(h.worker.state(), WorkerState::Failed);
    assert_eq!(std::fs::read(&h.paths.partial).unwrap(), payload());
    assert_eq!(h.notifier.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_before_start_makes_no_request() {
    let mut h = harness(FakeSource::serving(), None, config());
    h.worker.cancellation().cancel();

    assert_eq!(h.worker.run_attempt(0).await, WorkOutcome::Cancelled);
    assert!(h.source.requests().is_empty());
    assert!(h.notifier.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn error_during_cancellation_is_not_a_failure() {
    let source = FakeSource::new(vec![], Script::CancelThenFail);
    let mut h = harness(source, None, config());

    assert_eq!(h.worker.run_attempt(0).await, WorkOutcome::Cancelled);
    assert_eq!(h.worker.state(), WorkerState::Cancelled);
    assert!(h.notifier.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_mid_transfer_keeps_progress_for_resume() {
    let source = FakeSource::new(vec![Script::CancelAfter(4)], Script::Serve { fail_after: None });
    let mut h = harness(source, None, config());

    assert_eq!(h.worker.run_attempt(0).await, WorkOutcome::Cancelled);

    // chunk 4 was already yielded when the token fired
    assert_eq!(h.store.get(KEY_BYTES_DONE).unwrap(), Some(5 * CHUNK as i64));
    assert_eq!(std::fs::metadata(&h.paths.partial).unwrap().len(), 5 * CHUNK as u64);
    assert!(!h.paths.destination.exists());
    assert!(h.notifier.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn checksum_enqueues_unique_verification() {
    let mut h = harness(FakeSource::serving(), Some("abc123"), config());

    assert!(matches!(h.worker.run_attempt(0).await, WorkOutcome::Succeeded(_)));

    let tasks = h.queue.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].0, VERIFICATION_WORK_NAME);
    assert_eq!(tasks[0].1.checksum, "abc123");
    assert_eq!(tasks[0].1.path, h.paths.destination);
}

#[tokio::test]
async fn verify_off_skips_verification() {
    let config = WorkerConfig {
        verify_mode: VerifyMode::Off,
        ..config()
    };
    let mut h = harness(FakeSource::serving(), Some("abc123"), config);

    assert!(matches!(h.worker.run_attempt(0).await, WorkOutcome::Succeeded(_)));
    assert!(h.queue.tasks.lock().unwrap().is_empty());
}
