//! Serving metrics and statistics tracking for the ensemble core.

use crate::models::confidence;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for prediction serving
pub struct ServingMetrics {
    /// Predictions that returned a result
    pub predictions_served: AtomicU64,
    /// Predictions that returned an error
    pub predictions_failed: AtomicU64,
    /// Predictions served with at least one model missing
    pub degraded_predictions: AtomicU64,
    pub reloads_succeeded: AtomicU64,
    pub reloads_failed: AtomicU64,
    /// Model calls slower than the configured budget
    pub slow_model_calls: AtomicU64,
    /// End-to-end latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Per-model scoring times (in microseconds)
    model_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Per-model scoring failures
    model_failures: RwLock<HashMap<String, u64>>,
    /// Confidence distribution buckets
    confidence_buckets: RwLock<[u64; 10]>,
    /// Model agreement samples (1 - coefficient of variation, floored at 0)
    model_agreements: RwLock<Vec<f64>>,
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            predictions_failed: AtomicU64::new(0),
            degraded_predictions: AtomicU64::new(0),
            reloads_succeeded: AtomicU64::new(0),
            reloads_failed: AtomicU64::new(0),
            slow_model_calls: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            model_times: RwLock::new(HashMap::new()),
            model_failures: RwLock::new(HashMap::new()),
            confidence_buckets: RwLock::new([0; 10]),
            model_agreements: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(&self, latency: Duration, confidence: Option<f64>, degraded: bool) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_predictions.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut latencies = self.latencies.write();
            latencies.push(latency.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if latencies.len() > 10000 {
                latencies.drain(0..5000);
            }
        }

        if let Some(confidence) = confidence {
            let bucket = ((confidence * 10.0) as usize).min(9);
            self.confidence_buckets.write()[bucket] += 1;
        }
    }

    /// Record a prediction that returned an error
    pub fn record_failure(&self) {
        self.predictions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record model scoring time
    pub fn record_model_time(&self, model_name: &str, duration: Duration) {
        let mut times = self.model_times.write();
        let model_times = times.entry(model_name.to_string()).or_default();
        model_times.push(duration.as_micros() as u64);
        // Keep only last 1000 per model
        if model_times.len() > 1000 {
            model_times.drain(0..500);
        }
    }

    pub fn record_model_failure(&self, model_name: &str) {
        *self
            .model_failures
            .write()
            .entry(model_name.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_slow_model(&self) {
        self.slow_model_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self, succeeded: bool) {
        if succeeded {
            self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record model agreement from successful outputs
    pub fn record_model_agreement(&self, outputs: &[f64]) {
        if outputs.len() < 2 {
            return;
        }
        let Some((mean, std_dev)) = confidence::mean_and_std(outputs) else {
            return;
        };
        let cv = std_dev / (mean.abs() + confidence::EPSILON);

        // Agreement = 1 - cv (higher = more agreement)
        let agreement = (1.0 - cv).max(0.0);

        let mut agreements = self.model_agreements.write();
        agreements.push(agreement);
        if agreements.len() > 1000 {
            agreements.drain(0..500);
        }
    }

    /// Get latency statistics
    pub fn get_latency_stats(&self) -> LatencyStats {
        let mut sorted: Vec<u64> = self.latencies.read().clone();
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Get per-model scoring stats
    pub fn get_model_stats(&self) -> HashMap<String, ModelStats> {
        let failures = self.get_model_failures();
        let times = self.model_times.read();
        let mut stats = HashMap::new();

        for (model, model_times) in times.iter() {
            if model_times.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = model_times.clone();
            sorted.sort_unstable();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                model.clone(),
                ModelStats {
                    calls: count as u64,
                    failures: failures.get(model).copied().unwrap_or(0),
                    mean_us: sum / count as u64,
                    p50_us: sorted[count / 2],
                    p99_us: sorted[(count as f64 * 0.99) as usize],
                },
            );
        }

        stats
    }

    pub fn get_model_failures(&self) -> HashMap<String, u64> {
        self.model_failures.read().clone()
    }

    /// Get average model agreement
    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = self.model_agreements.read();
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Get current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_confidence_distribution(&self) -> [u64; 10] {
        *self.confidence_buckets.read()
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            predictions_served: self.predictions_served.load(Ordering::Relaxed),
            predictions_failed: self.predictions_failed.load(Ordering::Relaxed),
            degraded_predictions: self.degraded_predictions.load(Ordering::Relaxed),
            reloads_succeeded: self.reloads_succeeded.load(Ordering::Relaxed),
            reloads_failed: self.reloads_failed.load(Ordering::Relaxed),
            slow_model_calls: self.slow_model_calls.load(Ordering::Relaxed),
            avg_agreement: self.get_avg_agreement(),
            throughput: self.get_throughput(),
            latency: self.get_latency_stats(),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let latency = &snapshot.latency;
        let confidence_dist = self.get_confidence_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           ENSEMBLE PREDICTION SERVING - METRICS SUMMARY      ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions Served: {:>8}  │  Throughput: {:>8.1} req/s ║",
            snapshot.predictions_served, snapshot.throughput
        );
        info!(
            "║ Failed: {:>8}  Degraded: {:>8}  Slow model calls: {:>6} ║",
            snapshot.predictions_failed, snapshot.degraded_predictions, snapshot.slow_model_calls
        );
        info!(
            "║ Reloads: {:>4} ok, {:>4} failed                                ║",
            snapshot.reloads_succeeded, snapshot.reloads_failed
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Latency (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}     ║",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us
        );
        info!(
            "║ Model Agreement: {:>5.1}% (higher = models agree more)        ║",
            snapshot.avg_agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Confidence Distribution:                                     ║");
        let total: u64 = confidence_dist.iter().sum();
        for (i, &count) in confidence_dist.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let model_stats = self.get_model_stats();
        if !model_stats.is_empty() {
            info!("Model Scoring Times (μs):");
            for (model, stats) in &model_stats {
                info!(
                    "  {}: mean={} p50={} p99={} (calls={}, failures={})",
                    model, stats.mean_us, stats.p50_us, stats.p99_us, stats.calls, stats.failures
                );
            }
        }
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Model-specific statistics
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub calls: u64,
    pub failures: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}

/// Counters at one instant
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub predictions_served: u64,
    pub predictions_failed: u64,
    pub degraded_predictions: u64,
    pub reloads_succeeded: u64,
    pub reloads_failed: u64,
    pub slow_model_calls: u64,
    pub avg_agreement: f64,
    pub throughput: f64,
    pub latency: LatencyStats,
}

/// Prints a summary every `interval_secs`
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
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
