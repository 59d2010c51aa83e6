//! Prometheus metrics definitions for the ensemble engine
//!
//! All metrics use the `ensemble_` prefix and are read-only.

use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for training, caching and monitoring
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Training runs by model and outcome (trained, skipped, failed, timeout)
    pub training_runs_total: CounterVec,
    /// Wall-clock training duration per model
    pub training_duration_seconds: HistogramVec,
    /// Cache lookups by result (hit, miss)
    pub cache_lookups_total: CounterVec,
    /// Entries evicted by capacity pressure
    pub cache_evictions_total: Counter,
    /// Entries physically stored in the cache
    pub cache_entries: GenericGauge<AtomicF64>,
    /// Registered models
    pub models_registered: GenericGauge<AtomicF64>,
    /// Penalized cross-validation accuracy per model
    pub cv_accuracy: GenericGaugeVec<AtomicF64>,
    /// Rolling live accuracy per symbol and model
    pub rolling_accuracy: GenericGaugeVec<AtomicF64>,
    /// Retrains scheduled by reason
    pub retrains_scheduled_total: CounterVec,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let training_runs_total = CounterVec::new(
            Opts::new("ensemble_training_runs_total", "Training runs by model and outcome"),
            &["model", "outcome"],
        )?;
        registry.register(Box::new(training_runs_total.clone()))?;

        let training_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ensemble_training_duration_seconds",
                "Model training duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
            &["model"],
        )?;
        registry.register(Box::new(training_duration_seconds.clone()))?;

        let cache_lookups_total = CounterVec::new(
            Opts::new("ensemble_cache_lookups_total", "Model cache lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let cache_evictions_total = Counter::with_opts(Opts::new(
            "ensemble_cache_evictions_total",
            "Model cache LRU evictions",
        ))?;
        registry.register(Box::new(cache_evictions_total.clone()))?;

        let cache_entries = Gauge::with_opts(Opts::new(
            "ensemble_cache_entries",
            "Entries stored in the model cache",
        ))?;
        registry.register(Box::new(cache_entries.clone()))?;

        let models_registered = Gauge::with_opts(Opts::new(
            "ensemble_models_registered",
            "Number of registered models",
        ))?;
        registry.register(Box::new(models_registered.clone()))?;

        let cv_accuracy = GaugeVec::new(
            Opts::new("ensemble_cv_accuracy", "Penalized cross-validation accuracy"),
            &["model"],
        )?;
        registry.register(Box::new(cv_accuracy.clone()))?;

        let rolling_accuracy = GaugeVec::new(
            Opts::new("ensemble_rolling_accuracy", "Rolling live prediction accuracy"),
            &["symbol", "model"],
        )?;
        registry.register(Box::new(rolling_accuracy.clone()))?;

        let retrains_scheduled_total = CounterVec::new(
            Opts::new("ensemble_retrains_scheduled_total", "Retrains scheduled by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(retrains_scheduled_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "ensemble_uptime_seconds",
            "Engine uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            training_runs_total,
            training_duration_seconds,
            cache_lookups_total,
            cache_evictions_total,
            cache_entries,
            models_registered,
            cv_accuracy,
            rolling_accuracy,
            retrains_scheduled_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_training(&self, model: &str, outcome: &str) {
        self.training_runs_total
            .with_label_values(&[model, outcome])
            .inc();
    }

    pub fn observe_training(&self, model: &str, seconds: f64) {
        self.training_duration_seconds
            .with_label_values(&[model])
            .observe(seconds);
    }

    pub fn inc_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn set_cv_accuracy(&self, model: &str, accuracy: f64) {
        self.cv_accuracy.with_label_values(&[model]).set(accuracy);
    }

    pub fn set_rolling_accuracy(&self, symbol: &str, model: &str, accuracy: f64) {
        self.rolling_accuracy
            .with_label_values(&[symbol, model])
            .set(accuracy);
    }

    pub fn inc_retrain_scheduled(&self, reason: &str) {
        self.retrains_scheduled_total
            .with_label_values(&[reason])
            .inc();
    }
}
