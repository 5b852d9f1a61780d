use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Scheduler counters, updated with relaxed atomics on the hot path.
#[derive(Debug)]
pub struct Metrics {
    /// Job bodies executed (including ones that panicked).
    pub jobs_executed: AtomicU64,
    /// Jobs taken from the worker's own deque.
    pub local_pops: AtomicU64,
    /// Jobs taken from another worker's deque.
    pub steals_success: AtomicU64,
    /// Steal attempts that found the victim empty.
    pub steals_empty: AtomicU64,
    /// Steal attempts that lost a race for the victim's top item.
    pub steals_retry: AtomicU64,
    /// Continuations submitted by finishing ancestors.
    pub continuations_released: AtomicU64,
    /// Jobs executed in place because the local deque was full.
    pub inline_executions: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_executed: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_empty: AtomicU64::new(0),
            steals_retry: AtomicU64::new(0),
            continuations_released: AtomicU64::new(0),
            inline_executions: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_empty: self.steals_empty.load(Ordering::Relaxed),
            steals_retry: self.steals_retry.load(Ordering::Relaxed),
            continuations_released: self.continuations_released.load(Ordering::Relaxed),
            inline_executions: self.inline_executions.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_executed: u64,
    pub local_pops: u64,
    pub steals_success: u64,
    pub steals_empty: u64,
    pub steals_retry: u64,
    pub continuations_released: u64,
    pub inline_executions: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of steal attempts that came back with a job.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steals_success + self.steals_empty + self.steals_retry;
        if attempts == 0 {
            0.0
        } else {
            self.steals_success as f64 / attempts as f64
        }
    }
}
