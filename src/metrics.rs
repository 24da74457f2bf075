//! Serving counters, latency percentiles and recommendation distribution.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::types::PredictionResponse;

const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector for the prediction service
pub struct ServingMetrics {
    /// Requests answered successfully
    pub requests: AtomicU64,
    /// Requests rejected or failed
    pub errors: AtomicU64,
    /// BINs ranked across all requests
    pub bins_ranked: AtomicU64,
    /// Rankings that fell back to external processors
    pub fallbacks: AtomicU64,
    /// Rankings for BINs with no history
    pub cold_bins: AtomicU64,
    /// Rankings with no processors at all
    pub empty_results: AtomicU64,
    /// Candidates whose score defaulted to zero
    pub scoring_failures: AtomicU64,
    /// Request latencies in microseconds
    latencies: RwLock<Vec<u64>>,
    /// How often each processor was ranked first
    top_processors: RwLock<HashMap<String, u64>>,
    /// Rank-1 predicted percent, in 10% buckets
    top_percent_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bins_ranked: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            cold_bins: AtomicU64::new(0),
            empty_results: AtomicU64::new(0),
            scoring_failures: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            top_processors: RwLock::new(HashMap::new()),
            top_percent_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record an answered request and the rankings it returned
    pub fn record_request(&self, latency: Duration, responses: &[PredictionResponse]) {
        self.requests.fetch_add(1, Ordering::Relaxed);

        {
            let mut latencies = self.latencies.write();
            latencies.push(latency.as_micros() as u64);
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        for response in responses {
            self.record_response(response);
        }
    }

    fn record_response(&self, response: &PredictionResponse) {
        self.bins_ranked.fetch_add(1, Ordering::Relaxed);
        if response.fallback_used {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        if !response.bin_known {
            self.cold_bins.fetch_add(1, Ordering::Relaxed);
        }

        match response.top() {
            Some(top) => {
                *self
                    .top_processors
                    .write()
                    .entry(top.processor_name.clone())
                    .or_insert(0) += 1;

                let bucket = (top.predicted_success_percent / 10.0).clamp(0.0, 9.0) as usize;
                self.top_percent_buckets.write()[bucket] += 1;
            }
            None => {
                self.empty_results.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scoring_failures(&self, count: u64) {
        if count > 0 {
            self.scoring_failures.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn get_latency_stats(&self) -> LatencyStats {
        let mut sorted = self.latencies.read().clone();
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            p99_us: sorted[((count as f64 * 0.99) as usize).min(count - 1)],
            max_us: sorted[count - 1],
        }
    }

    /// Requests per second since start
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_top_processors(&self) -> HashMap<String, u64> {
        self.top_processors.read().clone()
    }

    pub fn get_top_percent_distribution(&self) -> [u64; 10] {
        *self.top_percent_buckets.read()
    }

    /// Share of ranked BINs that fell back to external processors
    pub fn fallback_rate(&self) -> f64 {
        let ranked = self.bins_ranked.load(Ordering::Relaxed);
        if ranked == 0 {
            return 0.0;
        }
        self.fallbacks.load(Ordering::Relaxed) as f64 / ranked as f64
    }

    pub fn print_summary(&self) {
        let latency = self.get_latency_stats();

        info!(
            requests = self.requests.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            bins_ranked = self.bins_ranked.load(Ordering::Relaxed),
            throughput = format!("{:.1} req/s", self.get_throughput()),
            "Serving summary"
        );
        info!(
            fallback_rate = format!("{:.1}%", self.fallback_rate() * 100.0),
            cold_bins = self.cold_bins.load(Ordering::Relaxed),
            empty_results = self.empty_results.load(Ordering::Relaxed),
            scoring_failures = self.scoring_failures.load(Ordering::Relaxed),
            "Ranking outcomes"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Request latency"
        );

        let mut top: Vec<(String, u64)> = self.get_top_processors().into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (name, count) in top.iter().take(10) {
            info!(processor = %name, count = count, "Ranked first");
        }

        let distribution = self.get_top_percent_distribution();
        let total: u64 = distribution.iter().sum();
        for (i, &count) in distribution.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let pct = (count as f64 / total as f64) * 100.0;
            info!(
                "Rank-1 success {:>3}-{:>3}%: {:>6} ({:>5.1}%)",
                i * 10,
                (i + 1) * 10,
                count,
                pct
            );
        }
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs a metrics summary on a fixed period
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

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
