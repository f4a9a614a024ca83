use httplab_common::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Shared request statistics for one load run.
///
/// Counters are lock-free; the latency samples sit behind a mutex because
/// percentiles need a full sort over a consistent copy.
#[derive(Default)]
pub struct StatsAggregator {
    total_requests: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    success_latency_ns: AtomicU64,
    latency_samples: Mutex<Vec<Duration>>,
}

/// Counter values read at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl StatsSnapshot {
    /// Percentage of `part` in `total_requests`; 0 when nothing was sent.
    pub fn percent_of_total(&self, part: u64) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        part as f64 / self.total_requests as f64 * 100.0
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request. Only successful requests contribute a
    /// latency sample; errors are counted but excluded from latency figures.
    pub fn record_attempt<T>(&self, latency: Duration, outcome: &Result<T>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
                self.success_latency_ns
                    .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
                self.latency_samples
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(latency);
            }
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Sum of successful request latencies.
    pub fn success_latency_total(&self) -> Duration {
        Duration::from_nanos(self.success_latency_ns.load(Ordering::Relaxed))
    }

    /// Copy of the latency samples, taken under the lock. Does not clear.
    pub fn latency_samples(&self) -> Vec<Duration> {
        self.latency_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Nearest-rank percentile of an ascending slice: the element at index
/// `floor((n - 1) * p / 100)`. Returns zero for an empty slice.
pub fn percentile(sorted: &[Duration], p: u32) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = (sorted.len() - 1) * p.min(100) as usize / 100;
    sorted[idx]
}

/// Latency statistics over the successful requests of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Sorts `samples` ascending and summarises them. An empty set yields an
    /// all-zero summary.
    pub fn from_samples(mut samples: Vec<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let total_ns: u128 = samples.iter().map(Duration::as_nanos).sum();
        Self {
            count: samples.len(),
            average: Duration::from_nanos((total_ns / samples.len() as u128) as u64),
            min: samples[0],
            max: samples[samples.len() - 1],
            p50: percentile(&samples, 50),
            p95: percentile(&samples, 95),
            p99: percentile(&samples, 99),
        }
    }
}
