//! # Relay Metrics
//!
//! Counters for sessions, frames and datagrams plus a dispatch latency
//! histogram.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Relaxed atomic counters, no locks on the
//!    request path.
//! 2. **Fixed Buckets**: Histogram bounds are chosen once at construction.
//! 3. **Plain Snapshots**: Readers get owned structs they can print or
//!    compare without touching the atomics again.
//!
//! ## Notes
//! - Nothing in the wire protocol reports these; they are for operators and
//!   tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default dispatch latency bucket boundaries in microseconds.
///
/// Dispatch includes store round trips, so the range reaches 100ms.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 10] =
    [50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 50_000, 100_000];

/// How a single query frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Dispatched to a handler (including `Quit`).
    Dispatched,
    /// Header mapped to no handler; logged and skipped.
    Unknown,
    /// Frame or payload error that ended the session.
    Failed,
}

/// Snapshot of all relay metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_active: u64,
    pub frames_dispatched: u64,
    pub frames_unknown: u64,
    pub frames_failed: u64,
    pub datagrams_received: u64,
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts; the last entry is the overflow bucket.
    pub buckets: Vec<u64>,
    pub samples: u64,
    pub sum_us: u64,
}

/// Thread-safe metrics shared by the accept loops and every handler.
pub struct RelayMetrics {
    sessions_opened: AtomicU64,
    sessions_active: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_unknown: AtomicU64,
    frames_failed: AtomicU64,
    datagrams_received: AtomicU64,
    latency: LatencyHistogram,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates metrics with custom, ascending microsecond bucket bounds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        RelayMetrics {
            sessions_opened: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            frames_dispatched: AtomicU64::new(0),
            frames_unknown: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one query frame. Latency is only sampled for dispatched frames.
    pub fn record_frame(&self, outcome: FrameOutcome, latency: Duration) {
        let counter = match outcome {
            FrameOutcome::Dispatched => {
                self.latency.record(latency);
                &self.frames_dispatched
            }
            FrameOutcome::Unknown => &self.frames_unknown,
            FrameOutcome::Failed => &self.frames_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_unknown: self.frames_unknown.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        // First bound >= micros; past-the-end is the overflow bucket.
        let idx = self.bounds_us.partition_point(|&bound| bound < micros);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
