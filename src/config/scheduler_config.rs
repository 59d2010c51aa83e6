use super::parse_or;
use crate::domain::performance::performance_evaluator::RetrainThresholds;
use anyhow::{Result, ensure};
use std::time::Duration;

/// Retrain scheduling and performance monitoring configuration
#[derive(Debug, Clone)]
pub struct SchedulerEnvConfig {
    pub retrain_interval: Duration,
    /// A retrain within this window of the last completed one is skipped.
    pub cooldown: Duration,
    pub trend_decline: f64,
    pub min_accuracy: f64,
    pub min_samples: usize,
    pub monitor_capacity: usize,
    pub check_interval: Duration,
}

impl Default for SchedulerEnvConfig {
    fn default() -> Self {
        Self {
            retrain_interval: Duration::from_secs(86_400),
            cooldown: Duration::from_secs(60),
            trend_decline: 0.1,
            min_accuracy: 0.45,
            min_samples: 20,
            monitor_capacity: 500,
            check_interval: Duration::from_secs(300),
        }
    }
}

impl SchedulerEnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            retrain_interval: Duration::from_secs(parse_or(lookup, "RETRAIN_INTERVAL_SECS", 86_400u64)?),
            cooldown: Duration::from_secs(parse_or(lookup, "RETRAIN_COOLDOWN_SECS", 60u64)?),
            trend_decline: parse_or(lookup, "RETRAIN_TREND_DECLINE", 0.1f64)?,
            min_accuracy: parse_or(lookup, "RETRAIN_MIN_ACCURACY", 0.45f64)?,
            min_samples: parse_or(lookup, "RETRAIN_MIN_SAMPLES", 20usize)?,
            monitor_capacity: parse_or(lookup, "MONITOR_CAPACITY", 500usize)?,
            check_interval: Duration::from_secs(parse_or(lookup, "RETRAIN_CHECK_INTERVAL_SECS", 300u64)?),
        };
        ensure!(
            !config.check_interval.is_zero(),
            "RETRAIN_CHECK_INTERVAL_SECS must be at least 1"
        );
        Ok(config)
    }

    pub fn thresholds(&self) -> RetrainThresholds {
        RetrainThresholds {
            retrain_interval: chrono::Duration::from_std(self.retrain_interval)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            trend_decline: self.trend_decline,
            min_accuracy: self.min_accuracy,
            min_samples: self.min_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lookup_from;

    #[test]
    fn test_scheduler_config() {
        let config = SchedulerEnvConfig::from_lookup(&|_: &str| None).unwrap();
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.thresholds().retrain_interval, chrono::Duration::hours(24));

        let lookup = lookup_from(&[("RETRAIN_INTERVAL_SECS", "600"), ("MONITOR_CAPACITY", "50")]);
        let config = SchedulerEnvConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.thresholds().retrain_interval, chrono::Duration::minutes(10));
        assert_eq!(config.monitor_capacity, 50);
    }

    #[test]
    fn test_zero_check_interval_rejected() {
        let lookup = lookup_from(&[("RETRAIN_CHECK_INTERVAL_SECS", "0")]);
        let err = SchedulerEnvConfig::from_lookup(&lookup).unwrap_err();
        assert!(err.to_string().contains("RETRAIN_CHECK_INTERVAL_SECS"));
    }
}
