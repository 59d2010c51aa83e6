//! Training configuration: tree hyperparameters, ensemble shape, budget.

use super::{parse_opt, parse_or};
use crate::application::ml::ensemble::EnsembleSettings;
use crate::domain::ml::model::EnsembleMethod;
use crate::domain::ml::regression_tree::TreeParams;
use anyhow::{Context, Result, ensure};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TrainingEnvConfig {
    pub tree: TreeParams,
    pub ensemble_method: EnsembleMethod,
    pub ensemble_size: usize,
    pub workers: usize,
    pub seed: Option<u64>,
    pub timeout: Duration,
    pub learning_rate: f64,
    pub stacking_holdout: f64,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for TrainingEnvConfig {
    fn default() -> Self {
        Self {
            tree: TreeParams::default(),
            ensemble_method: EnsembleMethod::Bagging,
            ensemble_size: 25,
            workers: default_workers(),
            seed: None,
            timeout: Duration::from_secs(300),
            learning_rate: 0.1,
            stacking_holdout: 0.3,
        }
    }
}

impl TrainingEnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TreeParams::default();
        let tree = TreeParams {
            max_depth: parse_or(lookup, "TREE_MAX_DEPTH", defaults.max_depth)?,
            min_samples_split: parse_or(lookup, "TREE_MIN_SAMPLES_SPLIT", defaults.min_samples_split)?,
            min_samples_leaf: parse_or(lookup, "TREE_MIN_SAMPLES_LEAF", defaults.min_samples_leaf)?,
        };

        let ensemble_method = match lookup("ENSEMBLE_METHOD") {
            Some(raw) => raw
                .trim()
                .parse::<EnsembleMethod>()
                .context("Failed to parse ENSEMBLE_METHOD")?,
            None => EnsembleMethod::Bagging,
        };

        let ensemble_size = parse_or(lookup, "ENSEMBLE_SIZE", 25usize)?;
        ensure!(ensemble_size > 0, "ENSEMBLE_SIZE must be at least 1");

        let workers = parse_or(lookup, "TRAINING_WORKERS", default_workers())?;
        ensure!(workers > 0, "TRAINING_WORKERS must be at least 1");

        let learning_rate = parse_or(lookup, "BOOSTING_LEARNING_RATE", 0.1f64)?;
        ensure!(
            learning_rate > 0.0 && learning_rate <= 1.0,
            "BOOSTING_LEARNING_RATE must be in (0, 1], got {}",
            learning_rate
        );

        let stacking_holdout = parse_or(lookup, "STACKING_HOLDOUT_FRACTION", 0.3f64)?;
        ensure!(
            (0.0..1.0).contains(&stacking_holdout),
            "STACKING_HOLDOUT_FRACTION must be in [0, 1), got {}",
            stacking_holdout
        );

        Ok(Self {
            tree,
            ensemble_method,
            ensemble_size,
            workers,
            seed: parse_opt(lookup, "TRAINING_SEED")?,
            timeout: Duration::from_secs(parse_or(lookup, "TRAINING_TIMEOUT_SECS", 300u64)?),
            learning_rate,
            stacking_holdout,
        })
    }

    pub fn ensemble_settings(&self) -> EnsembleSettings {
        EnsembleSettings {
            workers: self.workers,
            seed: self.seed,
            learning_rate: self.learning_rate,
            stacking_holdout: self.stacking_holdout,
        }
    }
}
