use super::parse_or;
use crate::application::ml::cross_validation::CvSettings;
use anyhow::{Result, ensure};

/// Cross-validation configuration
#[derive(Debug, Clone)]
pub struct ValidationEnvConfig {
    pub min_train_size: usize,
    pub min_validation_size: usize,
    pub max_folds: usize,
    pub gap: usize,
    pub decision_threshold: f64,
}

impl Default for ValidationEnvConfig {
    fn default() -> Self {
        let cv = CvSettings::default();
        Self {
            min_train_size: cv.min_train_size,
            min_validation_size: cv.min_validation_size,
            max_folds: cv.max_folds,
            gap: cv.gap,
            decision_threshold: cv.decision_threshold,
        }
    }
}

impl ValidationEnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let config = Self {
            min_train_size: parse_or(lookup, "CV_MIN_TRAIN_SIZE", d.min_train_size)?,
            min_validation_size: parse_or(lookup, "CV_MIN_VALIDATION_SIZE", d.min_validation_size)?,
            max_folds: parse_or(lookup, "CV_MAX_FOLDS", d.max_folds)?,
            gap: parse_or(lookup, "CV_GAP", d.gap)?,
            decision_threshold: parse_or(lookup, "CV_DECISION_THRESHOLD", d.decision_threshold)?,
        };
        ensure!(config.max_folds > 0, "CV_MAX_FOLDS must be at least 1");
        ensure!(
            config.min_validation_size > 0,
            "CV_MIN_VALIDATION_SIZE must be at least 1"
        );
        Ok(config)
    }

    pub fn cv_settings(&self) -> CvSettings {
        CvSettings {
            min_train_size: self.min_train_size,
            min_validation_size: self.min_validation_size,
            max_folds: self.max_folds,
            gap: self.gap,
            decision_threshold: self.decision_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::lookup_from;

    #[test]
    fn test_validation_config() {
        let lookup = lookup_from(&[("CV_GAP", "4"), ("CV_DECISION_THRESHOLD", "0.0")]);
        let settings = ValidationEnvConfig::from_lookup(&lookup).unwrap().cv_settings();
        assert_eq!(settings.gap, 4);
        assert_eq!(settings.decision_threshold, 0.0);
        assert_eq!(settings.min_train_size, 30);

        let lookup = lookup_from(&[("CV_MAX_FOLDS", "0")]);
        assert!(ValidationEnvConfig::from_lookup(&lookup).is_err());
    }
}
