//! Write and inference timing statistics for the serving process.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the reactor
pub struct ServingMetrics {
    /// Writes that published a full output set
    pub writes_completed: AtomicU64,
    /// Writes that failed before publishing
    pub writes_failed: AtomicU64,
    /// Individual PV posts
    pub posts: AtomicU64,
    /// End-to-end write times (in microseconds)
    write_times: RwLock<Vec<u64>>,
    /// Inference pass times (in microseconds)
    inference_times: RwLock<Vec<u64>>,
    /// Writes per input PV
    writes_by_pv: RwLock<HashMap<String, u64>>,
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            writes_completed: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            posts: AtomicU64::new(0),
            write_times: RwLock::new(Vec::with_capacity(1000)),
            inference_times: RwLock::new(Vec::with_capacity(1000)),
            writes_by_pv: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a write that published its outputs
    pub fn record_write(&self, pv: &str, total: Duration, inference: Duration, posts: usize) {
        self.writes_completed.fetch_add(1, Ordering::Relaxed);
        self.posts.fetch_add(posts as u64, Ordering::Relaxed);
        push_bounded(&self.write_times, total);
        push_bounded(&self.inference_times, inference);
        *self.writes_by_pv.write().entry(pv.to_string()).or_insert(0) += 1;
    }

    pub fn record_failure(&self, pv: &str) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
        *self.writes_by_pv.write().entry(pv.to_string()).or_insert(0) += 1;
    }

    pub fn write_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&self.write_times.read())
    }

    pub fn inference_stats(&self) -> LatencyStats {
        LatencyStats::from_samples(&self.inference_times.read())
    }

    pub fn writes_by_pv(&self) -> HashMap<String, u64> {
        self.writes_by_pv.read().clone()
    }

    /// Completed writes per second since start
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.writes_completed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        let completed = self.writes_completed.load(Ordering::Relaxed);
        let failed = self.writes_failed.load(Ordering::Relaxed);
        let writes = self.write_stats();
        let inference = self.inference_stats();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              SURROGATE PV SERVER - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Writes Completed: {:>8}  │  Throughput: {:>8.1} writes/s ║",
            completed,
            self.throughput()
        );
        info!(
            "║ Writes Failed:    {:>8}  │  PV Posts:   {:>8}         ║",
            failed,
            self.posts.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Write Time (μs):     mean={:>6} p50={:>6} p99={:>6}       ║",
            writes.mean_us, writes.p50_us, writes.p99_us
        );
        info!(
            "║ Inference Time (μs): mean={:>6} p50={:>6} p99={:>6}       ║",
            inference.mean_us, inference.p50_us, inference.p99_us
        );
        info!("╚══════════════════════════════════════════════════════════════╝");

        let mut by_pv: Vec<_> = self.writes_by_pv().into_iter().collect();
        by_pv.sort();
        for (pv, count) in by_pv {
            info!("  {}: {} writes", pv, count);
        }
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(samples: &RwLock<Vec<u64>>, duration: Duration) {
    let mut samples = samples.write();
    samples.push(duration.as_micros() as u64);
    // Keep only last 10000
    if samples.len() > 10000 {
        samples.drain(0..5000);
    }
}

/// Latency percentiles over the retained samples
#[derive(Debug, Default, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        Self {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }
}

/// Prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<ServingMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServingMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
