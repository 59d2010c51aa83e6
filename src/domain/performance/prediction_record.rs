use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live prediction observed on the serving path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub model: String,
    pub confidence: f64,
    pub quality: f64,
    pub correct: bool,
}

impl ModelPerformanceRecord {
    pub fn new(
        symbol: impl Into<String>,
        model: impl Into<String>,
        confidence: f64,
        quality: f64,
        correct: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.into(),
            model: model.into(),
            confidence,
            quality,
            correct,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Rolling statistics for one (symbol, model) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub samples: usize,
    /// Fraction of correct predictions in the buffer.
    pub accuracy_rate: f64,
    pub avg_confidence: f64,
    pub avg_quality: f64,
    /// Mean confidence of the latest window minus the window before it.
    /// `None` until two full windows are available.
    pub confidence_trend: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}
