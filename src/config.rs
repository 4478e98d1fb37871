use std::time::Duration;

use crate::cli::VerifyMode;
use crate::retry::RetryPolicy;

pub const USER_AGENT: &str = "otadl/0.1.0";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Allowed gap between the server's reported size and the advertised one.
pub const SIZE_TOLERANCE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub progress_interval: Duration,
    pub retry: RetryPolicy,
    pub size_tolerance: u64,
    /// Bytes per second, unlimited when `None`.
    pub rate_limit: Option<u32>,
    pub verify_mode: VerifyMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            retry: RetryPolicy::default(),
            size_tolerance: SIZE_TOLERANCE,
            rate_limit: None,
            verify_mode: VerifyMode::Auto,
        }
    }
}
