use crate::domain::performance::prediction_record::PerformanceStats;
use crate::domain::performance::retrain_trigger::{RetrainReason, RetrainSchedule};
use chrono::{DateTime, Duration, Utc};

/// Configuration thresholds for retrain evaluation
#[derive(Debug, Clone)]
pub struct RetrainThresholds {
    pub retrain_interval: Duration,
    /// Trend at or below `-trend_decline` triggers a retrain.
    pub trend_decline: f64,
    pub min_accuracy: f64,
    /// Accuracy is ignored until this many records exist.
    pub min_samples: usize,
}

impl Default for RetrainThresholds {
    fn default() -> Self {
        Self {
            retrain_interval: Duration::hours(24),
            trend_decline: 0.1,
            min_accuracy: 0.45,
            min_samples: 20,
        }
    }
}

/// Decides whether live performance warrants retraining
#[derive(Debug, Clone)]
pub struct PerformanceEvaluator {
    thresholds: RetrainThresholds,
}

impl PerformanceEvaluator {
    pub fn new(thresholds: RetrainThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RetrainThresholds {
        &self.thresholds
    }

    /// First matching reason, checked in order: never trained, interval,
    /// trend, accuracy.
    pub fn evaluate(
        &self,
        schedule: Option<&RetrainSchedule>,
        stats: &PerformanceStats,
        now: DateTime<Utc>,
    ) -> Option<RetrainReason> {
        // 1. Never scheduled
        let Some(schedule) = schedule else {
            return Some(RetrainReason::NeverTrained);
        };

        // 2. Interval
        if now - schedule.last_scheduled > self.thresholds.retrain_interval {
            return Some(RetrainReason::IntervalElapsed);
        }

        // 3. Confidence trend
        if let Some(trend) = stats.confidence_trend {
            if trend < -self.thresholds.trend_decline {
                return Some(RetrainReason::DecliningTrend);
            }
        }

        // 4. Accuracy floor, only with enough evidence
        if stats.samples >= self.thresholds.min_samples
            && stats.accuracy_rate < self.thresholds.min_accuracy
        {
            return Some(RetrainReason::LowAccuracy);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_stats() -> PerformanceStats {
        PerformanceStats {
            samples: 50,
            accuracy_rate: 0.6,
            avg_confidence: 0.7,
            avg_quality: 0.7,
            confidence_trend: Some(0.01),
            last_updated: None,
        }
    }

    fn recent_schedule(now: DateTime<Utc>) -> RetrainSchedule {
        RetrainSchedule::new(
            "btc_bagging".to_string(),
            RetrainReason::NeverTrained,
            now - Duration::hours(1),
        )
    }

    #[test]
    fn test_never_trained_trigger() {
        let evaluator = PerformanceEvaluator::new(RetrainThresholds::default());
        assert_eq!(
            evaluator.evaluate(None, &healthy_stats(), Utc::now()),
            Some(RetrainReason::NeverTrained)
        );
    }

    #[test]
    fn test_interval_trigger() {
        let evaluator = PerformanceEvaluator::new(RetrainThresholds {
            retrain_interval: Duration::minutes(30),
            ..Default::default()
        });
        let now = Utc::now();

        assert_eq!(
            evaluator.evaluate(Some(&recent_schedule(now)), &healthy_stats(), now),
            Some(RetrainReason::IntervalElapsed)
        );
    }

    #[test]
    fn test_trend_trigger() {
        let evaluator = PerformanceEvaluator::new(RetrainThresholds::default());
        let now = Utc::now();
        let stats = PerformanceStats {
            confidence_trend: Some(-0.2),
            ..healthy_stats()
        };

        assert_eq!(
            evaluator.evaluate(Some(&recent_schedule(now)), &stats, now),
            Some(RetrainReason::DecliningTrend)
        );
    }

    #[test]
    fn test_accuracy_trigger_needs_samples() {
        let evaluator = PerformanceEvaluator::new(RetrainThresholds::default());
        let now = Utc::now();
        let thin = PerformanceStats {
            samples: 5,
            accuracy_rate: 0.1,
            ..healthy_stats()
        };
        assert_eq!(evaluator.evaluate(Some(&recent_schedule(now)), &thin, now), None);

        let poor = PerformanceStats {
            accuracy_rate: 0.3,
            ..healthy_stats()
        };
        assert_eq!(
            evaluator.evaluate(Some(&recent_schedule(now)), &poor, now),
            Some(RetrainReason::LowAccuracy)
        );
    }

    #[test]
    fn test_healthy_model_not_flagged() {
        let evaluator = PerformanceEvaluator::new(RetrainThresholds::default());
        let now = Utc::now();
        assert_eq!(
            evaluator.evaluate(Some(&recent_schedule(now)), &healthy_stats(), now),
            None
        );
    }
}
