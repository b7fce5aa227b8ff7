//! Metrics recording implementation using Prometheus.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec, Encoder,
    HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Trait for recording application metrics.
pub trait MetricsRecorder: Clone + Send + Sync + 'static {
    /// Records a qualification probe with its outcome (`qualified`, `rejected`).
    fn record_qualification_attempt(&self, provider: &str, result: &str);

    /// Records how long a qualification probe took.
    fn record_qualification_duration(&self, provider: &str, duration_secs: f64);

    /// Records a provisioning request; `provider` is the one that succeeded or `none`.
    fn record_provision_attempt(&self, provider: &str, result: &str);

    /// Records how long a provisioning request took.
    fn record_provision_duration(&self, result: &str, duration_secs: f64);

    /// Records a proof-of-control token verification.
    fn record_token_verification(&self, result: &str);
}

/// Prometheus metrics collector.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    qualification_attempts_total: CounterVec,
    qualification_duration_seconds: HistogramVec,

    provision_attempts_total: CounterVec,
    provision_duration_seconds: HistogramVec,

    token_verifications_total: CounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new metrics instance with its own Prometheus registry.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let qualification_attempts_total = register_counter_vec_with_registry!(
            Opts::new(
                "storage_qualification_attempts_total",
                "Total storage qualification probes"
            ),
            &["provider", "result"],
            registry.clone()
        )
        .expect("Failed to register storage_qualification_attempts_total");

        let qualification_duration_seconds = register_histogram_vec_with_registry!(
            "storage_qualification_duration_seconds",
            "Storage qualification probe duration in seconds",
            &["provider"],
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            registry.clone()
        )
        .expect("Failed to register storage_qualification_duration_seconds");

        let provision_attempts_total = register_counter_vec_with_registry!(
            Opts::new(
                "storage_provision_attempts_total",
                "Total storage provisioning requests"
            ),
            &["provider", "result"],
            registry.clone()
        )
        .expect("Failed to register storage_provision_attempts_total");

        let provision_duration_seconds = register_histogram_vec_with_registry!(
            "storage_provision_duration_seconds",
            "Storage provisioning duration in seconds",
            &["result"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            registry.clone()
        )
        .expect("Failed to register storage_provision_duration_seconds");

        let token_verifications_total = register_counter_vec_with_registry!(
            Opts::new(
                "storage_token_verifications_total",
                "Total proof-of-control token verifications"
            ),
            &["result"],
            registry.clone()
        )
        .expect("Failed to register storage_token_verifications_total");

        Metrics {
            registry,
            qualification_attempts_total,
            qualification_duration_seconds,
            provision_attempts_total,
            provision_duration_seconds,
            token_verifications_total,
        }
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("Metrics encoding produced invalid UTF-8: {}", e))
    }
}

impl MetricsRecorder for Metrics {
    fn record_qualification_attempt(&self, provider: &str, result: &str) {
        self.qualification_attempts_total
            .with_label_values(&[provider, result])
            .inc();
    }

    fn record_qualification_duration(&self, provider: &str, duration_secs: f64) {
        self.qualification_duration_seconds
            .with_label_values(&[provider])
            .observe(duration_secs);
    }

    fn record_provision_attempt(&self, provider: &str, result: &str) {
        self.provision_attempts_total
            .with_label_values(&[provider, result])
            .inc();
    }

    fn record_provision_duration(&self, result: &str, duration_secs: f64) {
        self.provision_duration_seconds
            .with_label_values(&[result])
            .observe(duration_secs);
    }

    fn record_token_verification(&self, result: &str) {
        self.token_verifications_total
            .with_label_values(&[result])
            .inc();
    }
}
