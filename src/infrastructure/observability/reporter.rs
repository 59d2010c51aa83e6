//! Push-based metrics reporter
//!
//! Periodically writes an engine snapshot as structured JSON to stdout.

use crate::application::engine::ModelEngine;
use crate::application::ml::model_cache::CacheStats;
use crate::domain::ml::model::ModelState;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub cache: CacheSnapshot,
    pub models: Vec<ModelSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expired: u64,
}

impl From<&CacheStats> for CacheSnapshot {
    fn from(stats: &CacheStats) -> Self {
        Self {
            entries: stats.entries,
            max_size: stats.max_size,
            hit_rate: stats.hit_rate(),
            evictions: stats.evictions,
            expired: stats.expired,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub symbol: String,
    pub state: ModelState,
    pub cv_accuracy: Option<f64>,
    pub live_accuracy: Option<f64>,
    pub live_samples: usize,
}

/// Outputs engine metrics on a fixed interval. Outbound only.
pub struct MetricsReporter {
    engine: Arc<ModelEngine>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(engine: Arc<ModelEngine>, interval_seconds: u64) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Prefix lets log shippers filter these lines
                    println!("METRICS_JSON:{}", json);
                    info!(
                        "Models: {} | Cache: {}/{} ({:.0}% hits) | Uptime: {}s",
                        snapshot.models.len(),
                        snapshot.cache.entries,
                        snapshot.cache.max_size,
                        snapshot.cache.hit_rate * 100.0,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("MetricsReporter: Failed to serialize metrics: {}", e),
            }
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let cache = self.engine.cache_stats();

        let models = self
            .engine
            .models()
            .into_iter()
            .map(|summary| {
                let live = self.engine.performance(&summary.name).unwrap_or_default();
                ModelSnapshot {
                    cv_accuracy: summary.validation.as_ref().map(|v| v.accuracy),
                    live_accuracy: (live.samples > 0).then_some(live.accuracy_rate),
                    live_samples: live.samples,
                    name: summary.name,
                    symbol: summary.symbol,
                    state: summary.state,
                }
            })
            .collect();

        let metrics = self.engine.metrics();
        metrics.uptime_seconds.set(uptime as f64);
        metrics.cache_entries.set(cache.entries as f64);

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache: CacheSnapshot::from(&cache),
            models,
        }
    }
}
