//! Throughput sampling and ETA estimation.
//!
//! The estimator is fed on every written chunk but only publishes once per
//! `min_interval`. Published samples feed a small moving window of
//! bytes-per-second measurements; the ETA is the remaining byte count
//! divided by the window average.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const SAMPLE_CAPACITY: usize = 10;

/// A sample older than this is accepted even when no bytes arrived.
pub const STALE_SAMPLE_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub percent: u8,
    /// `None` while the ETA is unknown.
    pub eta: Option<Duration>,
}

impl ProgressUpdate {
    pub fn new(bytes_done: u64, total_bytes: u64, eta: Option<Duration>) -> Self {
        let percent = if total_bytes > 0 {
            ((bytes_done.min(total_bytes) as f64 / total_bytes as f64) * 100.0) as u8
        } else {
            0
        };
        Self {
            bytes_done,
            total_bytes,
            percent,
            eta,
        }
    }

    pub fn finished(total_bytes: u64) -> Self {
        Self {
            bytes_done: total_bytes,
            total_bytes,
            percent: 100,
            eta: Some(Duration::ZERO),
        }
    }
}

/// Receives published progress. Called inline from the transfer loop, so
/// reads are blocked until `publish` returns.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: &ProgressUpdate);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn publish(&self, _update: &ProgressUpdate) {}
}

#[derive(Debug)]
pub struct ProgressEstimator {
    min_interval: Duration,
    previous: Option<(Instant, u64)>,
    samples: VecDeque<f64>,
}

impl ProgressEstimator {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            previous: None,
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY + 1),
        }
    }

    /// Feeds the current byte count. Returns an update when one is due.
    pub fn sample(&mut self, bytes_done: u64, total_bytes: u64, now: Instant) -> Option<ProgressUpdate> {
        let Some((prev_time, prev_bytes)) = self.previous else {
            self.previous = Some((now, bytes_done));
            return Some(ProgressUpdate::new(bytes_done, total_bytes, None));
        };

        let elapsed = now.saturating_duration_since(prev_time);
        if elapsed < self.min_interval {
            return None;
        }

        self.record(bytes_done.saturating_sub(prev_bytes), elapsed);
        self.previous = Some((now, bytes_done));

        Some(ProgressUpdate::new(
            bytes_done,
            total_bytes,
            self.eta(total_bytes.saturating_sub(bytes_done)),
        ))
    }

    fn record(&mut self, delta_bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { delta_bytes as f64 / secs } else { 0.0 };

        if throughput <= 0.0 && elapsed <= STALE_SAMPLE_THRESHOLD {
            return;
        }

        if throughput <= 0.0 {
            // stalled connection, stale averages would lie
            tracing::debug!(elapsed_secs = secs, "No bytes received, clearing throughput history");
            self.samples.clear();
            return;
        }

        self.samples.push_back(throughput);
        if self.samples.len() > SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn average_throughput(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let average = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        (average > 0.0).then_some(average)
    }

    /// Whole seconds left for `remaining` bytes, rounded down.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        self.average_throughput()
            .map(|average| Duration::from_secs((remaining as f64 / average).floor() as u64))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
