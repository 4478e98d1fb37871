//! Classification of transfer errors and the bounded retry policy.
//!
//! The worker only signals what should happen next; sleeping between
//! attempts is the scheduler's job.

use std::time::Duration;

use crate::failure::FailureKind;
use crate::source::TransferError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Cancelled,
    Network,
    Io,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stopped from outside; not a failure.
    Cancelled,
    Retry,
    GiveUp(FailureKind),
    /// Drop persisted state and the partial file, then fail as unknown.
    Reset,
}

/// Any error raised after cancellation was requested counts as cancellation.
pub fn classify(error: &TransferError, cancelled: bool) -> ErrorClass {
    if cancelled {
        return ErrorClass::Cancelled;
    }
    match error {
        TransferError::Network(_) => ErrorClass::Network,
        TransferError::Io(_) => ErrorClass::Io,
        TransferError::Other(_) => ErrorClass::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// `attempt` counts previous runs of the same work, starting at 0.
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        match class {
            ErrorClass::Cancelled => RetryDecision::Cancelled,
            ErrorClass::Network if attempt < self.max_attempts => RetryDecision::Retry,
            ErrorClass::Network => RetryDecision::GiveUp(FailureKind::ServerError),
            ErrorClass::Io if attempt < self.max_attempts => RetryDecision::Retry,
            ErrorClass::Io => RetryDecision::GiveUp(FailureKind::ConnectionError),
            ErrorClass::Other => RetryDecision::Reset,
        }
    }

    /// Linear backoff before re-running after `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.saturating_add(1))
    }
}
