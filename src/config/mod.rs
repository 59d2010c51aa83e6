//! Configuration module for the ensemble engine.
//!
//! Structured configuration loaded from environment variables, organized by
//! concern: Training, Cache, Validation, Scheduler and Observability. Every
//! sub-config also exposes `from_lookup` so parsing can be exercised
//! without touching the process environment.

mod cache_config;
mod observability_config;
mod scheduler_config;
mod training_config;
mod validation_config;

pub use cache_config::CacheEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use scheduler_config::SchedulerEnvConfig;
pub use training_config::TrainingEnvConfig;
pub use validation_config::ValidationEnvConfig;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Parse `key` from `lookup`, falling back to `default` when unset.
pub(crate) fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .context(format!("Failed to parse {}", key)),
        None => Ok(default),
    }
}

/// Parse an optional `key`; unset or empty means `None`.
pub(crate) fn parse_opt<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .context(format!("Failed to parse {}", key)),
        _ => Ok(None),
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub training: TrainingEnvConfig,
    pub cache: CacheEnvConfig,
    pub validation: ValidationEnvConfig,
    pub scheduler: SchedulerEnvConfig,
    pub observability: ObservabilityEnvConfig,
    /// Directory for JSON model metadata. `None` keeps metadata in memory.
    pub metadata_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            training: TrainingEnvConfig::from_lookup(&lookup)?,
            cache: CacheEnvConfig::from_lookup(&lookup)?,
            validation: ValidationEnvConfig::from_lookup(&lookup)?,
            scheduler: SchedulerEnvConfig::from_lookup(&lookup)?,
            observability: ObservabilityEnvConfig::from_lookup(&lookup)?,
            metadata_dir: lookup("MODEL_METADATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

#[cfg(test)]
pub(crate) fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
    let map: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.training.ensemble_size, 25);
        assert_eq!(config.cache.max_size, 32);
        assert_eq!(config.validation.max_folds, 5);
        assert!(config.metadata_dir.is_none());
    }

    #[test]
    fn test_metadata_dir_and_errors() {
        let config = EngineConfig::from_lookup(lookup_from(&[("MODEL_METADATA_DIR", "/tmp/models")]))
            .unwrap();
        assert_eq!(config.metadata_dir, Some(PathBuf::from("/tmp/models")));

        let err = EngineConfig::from_lookup(lookup_from(&[("CV_MAX_FOLDS", "many")])).unwrap_err();
        assert!(format!("{:#}", err).contains("CV_MAX_FOLDS"));
    }
}
