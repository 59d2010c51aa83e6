use crate::domain::performance::prediction_record::{ModelPerformanceRecord, PerformanceStats};
use statrs::statistics::{Data, Distribution};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Records compared on each side of the confidence trend.
pub const TREND_WINDOW: usize = 10;

type PairKey = (String, String);

/// Bounded history of live predictions per (symbol, model).
pub struct PerformanceMonitor {
    capacity: usize,
    history: RwLock<HashMap<PairKey, VecDeque<ModelPerformanceRecord>>>,
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("capacity", &self.capacity)
            .field("history", &"<RwLock>")
            .finish()
    }
}

fn mean_of(values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values).mean().unwrap_or(0.0)
}

impl PerformanceMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, dropping the oldest once the pair is at capacity.
    pub fn record(&self, record: ModelPerformanceRecord) {
        let key = (record.symbol.clone(), record.model.clone());
        let mut guard = match self.history.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("PerformanceMonitor: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };

        let buffer = guard
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(record);
    }

    /// Rolling statistics for one pair. Empty stats when nothing was recorded.
    pub fn stats(&self, symbol: &str, model: &str) -> PerformanceStats {
        let guard = match self.history.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(buffer) = guard.get(&(symbol.to_string(), model.to_string())) else {
            return PerformanceStats::default();
        };
        Self::compute_stats(buffer)
    }

    fn compute_stats(buffer: &VecDeque<ModelPerformanceRecord>) -> PerformanceStats {
        if buffer.is_empty() {
            return PerformanceStats::default();
        }

        let samples = buffer.len();
        let correct = buffer.iter().filter(|r| r.correct).count();
        let avg_confidence = mean_of(buffer.iter().map(|r| r.confidence).collect());
        let avg_quality = mean_of(buffer.iter().map(|r| r.quality).collect());

        // Latest window vs. the one right before it
        let confidence_trend = (samples >= 2 * TREND_WINDOW).then(|| {
            let recent: Vec<f64> = buffer
                .iter()
                .skip(samples - TREND_WINDOW)
                .map(|r| r.confidence)
                .collect();
            let prior: Vec<f64> = buffer
                .iter()
                .skip(samples - 2 * TREND_WINDOW)
                .take(TREND_WINDOW)
                .map(|r| r.confidence)
                .collect();
            mean_of(recent) - mean_of(prior)
        });

        PerformanceStats {
            samples,
            accuracy_rate: correct as f64 / samples as f64,
            avg_confidence,
            avg_quality,
            confidence_trend,
            last_updated: buffer.back().map(|r| r.timestamp),
        }
    }

    /// Forget a pair's history, typically after a retrain.
    pub fn reset(&self, symbol: &str, model: &str) {
        match self.history.write() {
            Ok(mut guard) => {
                guard.remove(&(symbol.to_string(), model.to_string()));
            }
            Err(poisoned) => {
                tracing::error!("PerformanceMonitor: Lock poisoned during reset, recovering");
                poisoned
                    .into_inner()
                    .remove(&(symbol.to_string(), model.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(confidence: f64, correct: bool) -> ModelPerformanceRecord {
        ModelPerformanceRecord::new("BTCUSDT", "btc_bagging", confidence, 0.5, correct)
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let monitor = PerformanceMonitor::new(5);
        for i in 0..8 {
            monitor.record(rec(i as f64 / 10.0, true));
        }

        // 0.3..=0.7 survive
        let stats = monitor.stats("BTCUSDT", "btc_bagging");
        assert_eq!(stats.samples, 5);
        assert!((stats.avg_confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_rate() {
        let monitor = PerformanceMonitor::new(100);
        for i in 0..10 {
            monitor.record(rec(0.6, i % 4 != 0));
        }
        let stats = monitor.stats("BTCUSDT", "btc_bagging");
        assert_eq!(stats.samples, 10);
        assert!((stats.accuracy_rate - 0.7).abs() < 1e-12);
        assert!((stats.avg_confidence - 0.6).abs() < 1e-12);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn test_trend_needs_two_windows() {
        let monitor = PerformanceMonitor::new(100);
        for _ in 0..19 {
            monitor.record(rec(0.8, true));
        }
        assert!(monitor.stats("BTCUSDT", "btc_bagging").confidence_trend.is_none());

        monitor.record(rec(0.8, true));
        let flat = monitor.stats("BTCUSDT", "btc_bagging").confidence_trend.unwrap();
        assert!(flat.abs() < 1e-12);
    }

    #[test]
    fn test_declining_trend() {
        let monitor = PerformanceMonitor::new(100);
        for _ in 0..10 {
            monitor.record(rec(0.9, true));
        }
        for _ in 0..10 {
            monitor.record(rec(0.6, false));
        }
        let trend = monitor.stats("BTCUSDT", "btc_bagging").confidence_trend.unwrap();
        assert!((trend + 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_pairs_are_independent() {
        let monitor = PerformanceMonitor::new(10);
        monitor.record(rec(0.5, true));
        monitor.record(ModelPerformanceRecord::new("ETHUSDT", "eth_tree", 0.4, 0.4, false));

        assert_eq!(monitor.stats("BTCUSDT", "btc_bagging").accuracy_rate, 1.0);
        assert_eq!(monitor.stats("ETHUSDT", "eth_tree").accuracy_rate, 0.0);
        assert_eq!(monitor.stats("SOLUSDT", "none").samples, 0);

        monitor.reset("ETHUSDT", "eth_tree");
        assert_eq!(monitor.stats("ETHUSDT", "eth_tree").samples, 0);
        assert_eq!(monitor.stats("BTCUSDT", "btc_bagging").samples, 1);
    }
}
