use crate::buffer::Rejected;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of latency measurements in nanoseconds
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker keeping the last `window_size` measurements
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters for one producer, worker or consumer.
///
/// Cloning shares the counters, so the pipeline can keep a handle while the
/// role's thread updates them.
#[derive(Debug, Clone)]
pub struct RoleMetrics {
    /// Samples that completed the role's full step
    moved: Arc<AtomicU64>,
    /// Writes rejected because the output was full
    full_rejections: Arc<AtomicU64>,
    /// Reads that found the input empty
    empty_polls: Arc<AtomicU64>,
    /// Operations that gave up on a buffer lock
    lock_timeouts: Arc<AtomicU64>,
    /// Samples read but never delivered downstream
    lost: Arc<AtomicU64>,
    /// Time from read to committed write, per sample
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl RoleMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            moved: Arc::new(AtomicU64::new(0)),
            full_rejections: Arc::new(AtomicU64::new(0)),
            empty_polls: Arc::new(AtomicU64::new(0)),
            lock_timeouts: Arc::new(AtomicU64::new(0)),
            lost: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    pub fn record_moved(&self) {
        self.moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected buffer operation under the matching counter
    pub fn record_rejected(&self, rejected: Rejected) {
        let counter = match rejected {
            Rejected::Full => &self.full_rejections,
            Rejected::Empty => &self.empty_polls,
            Rejected::LockTimeout { .. } => &self.lock_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a forward latency in nanoseconds
    pub fn record_latency(&self, nanos: u64) {
        self.latency_tracker.record(nanos);
    }

    pub fn total_moved(&self) -> u64 {
        self.moved.load(Ordering::Relaxed)
    }

    pub fn total_full_rejections(&self) -> u64 {
        self.full_rejections.load(Ordering::Relaxed)
    }

    pub fn total_empty_polls(&self) -> u64 {
        self.empty_polls.load(Ordering::Relaxed)
    }

    pub fn total_lock_timeouts(&self) -> u64 {
        self.lock_timeouts.load(Ordering::Relaxed)
    }

    pub fn total_lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Samples per second since the collector was created
    pub fn throughput_sps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_moved() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            moved: self.total_moved(),
            full_rejections: self.total_full_rejections(),
            empty_polls: self.total_empty_polls(),
            lock_timeouts: self.total_lock_timeouts(),
            lost: self.total_lost(),
            throughput_sps: self.throughput_sps(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p95_us: self.latency_tracker.p95_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for RoleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub moved: u64,
    pub full_rejections: u64,
    pub empty_polls: u64,
    pub lock_timeouts: u64,
    pub lost: u64,
    pub throughput_sps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Moved: {}, Lost: {}, Full: {}, Empty: {}, Lock timeouts: {}, \
             Throughput: {:.2} samples/s, Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, \
             Elapsed: {:.2}s",
            self.moved,
            self.lost,
            self.full_rejections,
            self.empty_polls,
            self.lock_timeouts,
            self.throughput_sps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
