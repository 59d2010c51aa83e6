use crate::application::ml::parallel_trainer::{ParallelTrainer, bootstrap_indices};
use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::{Dataset, MIN_TRAINING_ROWS, clean_training_rows};
use crate::domain::ml::learner::{BaseLearner, normalize_importance, uniform_importance};
use crate::domain::ml::linear::LinearLearner;
use crate::domain::ml::model::EnsembleMethod;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Ridge penalty of the default stacking meta-learner.
pub const DEFAULT_META_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSettings {
    /// Worker threads for parallel rounds.
    pub workers: usize,
    /// Fixed seed for bootstrap draws. `None` draws from the OS.
    pub seed: Option<u64>,
    /// Shrinkage applied to each boosting stage.
    pub learning_rate: f64,
    /// Trailing fraction of rows reserved for the stacking meta-learner.
    pub stacking_holdout: f64,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            seed: None,
            learning_rate: 0.1,
            stacking_holdout: 0.3,
        }
    }
}

/// Ordered base learners plus a fixed aggregation method.
///
/// The learner list is fixed at construction. Training never mutates the
/// configured learners in place: a new set is trained and swapped in only
/// when the whole round succeeds, so a failed retrain leaves the previous
/// state intact.
#[derive(Debug, Clone)]
pub struct EnsembleModel {
    method: EnsembleMethod,
    learners: Vec<Box<dyn BaseLearner>>,
    meta_learner: Option<Box<dyn BaseLearner>>,
    base_value: f64,
    settings: EnsembleSettings,
    n_features: usize,
    trained: bool,
}

impl EnsembleModel {
    pub fn new(
        method: EnsembleMethod,
        learners: Vec<Box<dyn BaseLearner>>,
        settings: EnsembleSettings,
    ) -> Result<Self, TrainingError> {
        if learners.is_empty() {
            return Err(TrainingError::invalid("ensemble needs at least one learner"));
        }
        if !(0.0..1.0).contains(&settings.stacking_holdout) {
            return Err(TrainingError::invalid(format!(
                "stacking holdout {} must be in [0, 1)",
                settings.stacking_holdout
            )));
        }
        if !(settings.learning_rate > 0.0 && settings.learning_rate.is_finite()) {
            return Err(TrainingError::invalid(format!(
                "learning rate {} must be positive",
                settings.learning_rate
            )));
        }

        let meta_learner = match method {
            EnsembleMethod::Stacking => {
                Some(Box::new(LinearLearner::ridge(DEFAULT_META_ALPHA)) as Box<dyn BaseLearner>)
            }
            _ => None,
        };

        Ok(Self {
            method,
            learners: learners.iter().map(|l| l.clone_untrained()).collect(),
            meta_learner,
            base_value: 0.0,
            settings,
            n_features: 0,
            trained: false,
        })
    }

    /// `size` untrained copies of `prototype`.
    pub fn homogeneous(
        method: EnsembleMethod,
        prototype: &dyn BaseLearner,
        size: usize,
        settings: EnsembleSettings,
    ) -> Result<Self, TrainingError> {
        let learners = (0..size).map(|_| prototype.clone_untrained()).collect();
        Self::new(method, learners, settings)
    }

    /// Replace the stacking meta-learner. Ignored for other methods.
    pub fn with_meta_learner(mut self, meta: Box<dyn BaseLearner>) -> Self {
        if self.method == EnsembleMethod::Stacking {
            self.meta_learner = Some(meta.clone_untrained());
        }
        self
    }

    pub fn method(&self) -> EnsembleMethod {
        self.method
    }

    pub fn len(&self) -> usize {
        self.learners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }

    pub fn learners(&self) -> &[Box<dyn BaseLearner>] {
        &self.learners
    }

    pub fn settings(&self) -> &EnsembleSettings {
        &self.settings
    }

    fn rng(&self) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn trainer(&self) -> ParallelTrainer {
        ParallelTrainer::new(self.settings.workers)
    }

    fn train_bagging(
        &self,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn BaseLearner>>, TrainingError> {
        let mut rng = self.rng();
        let samples = (0..self.learners.len())
            .map(|_| bootstrap_indices(data.len(), &mut rng))
            .collect();
        self.trainer().train_all(&self.learners, samples, data, cancel)
    }

    fn train_boosting(
        &self,
        data: &Dataset,
        base_value: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn BaseLearner>>, TrainingError> {
        let rate = self.settings.learning_rate;
        let mut running = vec![base_value; data.len()];
        let mut stages = Vec::with_capacity(self.learners.len());

        for (index, prototype) in self.learners.iter().enumerate() {
            let wrap = |source: TrainingError| TrainingError::WorkerFailed {
                index,
                source: Box::new(source),
            };
            cancel.check().map_err(wrap)?;

            let residuals: Vec<f64> = data
                .targets
                .iter()
                .zip(&running)
                .map(|(y, p)| y - p)
                .collect();

            let mut stage = prototype.clone_untrained();
            stage
                .train(&data.features, &residuals, cancel)
                .map_err(wrap)?;

            for (p, row) in running.iter_mut().zip(&data.features) {
                *p += rate * stage.predict(row);
            }
            stages.push(stage);
        }
        Ok(stages)
    }

    fn train_stacking(
        &self,
        data: &Dataset,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Box<dyn BaseLearner>>, Box<dyn BaseLearner>), TrainingError> {
        let meta_prototype = self
            .meta_learner
            .as_ref()
            .map(|m| m.clone_untrained())
            .unwrap_or_else(|| Box::new(LinearLearner::ridge(DEFAULT_META_ALPHA)));

        let n = data.len();
        let holdout = (n as f64 * self.settings.stacking_holdout).ceil() as usize;
        let split = n.saturating_sub(holdout);
        let full_rows: Vec<usize> = (0..n).collect();

        // Meta-learner inputs come from rows the base learners never saw,
        // and those rows always follow the base learners' rows in time.
        let (meta_features, meta_targets) =
            if holdout >= MIN_TRAINING_ROWS && split >= MIN_TRAINING_ROWS {
                let leading = data.slice(0..split);
                let trailing = data.slice(split..n);
                let samples = vec![(0..split).collect::<Vec<usize>>(); self.learners.len()];
                let level0 = self
                    .trainer()
                    .train_all(&self.learners, samples, &leading, cancel)?;
                (stack_predictions(&level0, &trailing.features), trailing.targets)
            } else {
                warn!(
                    "EnsembleModel: {} rows too few for a stacking holdout, meta-learner uses in-sample predictions",
                    n
                );
                let samples = vec![full_rows.clone(); self.learners.len()];
                let level0 = self
                    .trainer()
                    .train_all(&self.learners, samples, data, cancel)?;
                (stack_predictions(&level0, &data.features), data.targets.clone())
            };

        cancel.check()?;
        let mut meta = meta_prototype;
        let meta_name = format!("stacking meta-learner {}", meta.name());
        meta.train(&meta_features, &meta_targets, cancel)
            .map_err(|e| TrainingError::learner(meta_name, e))?;

        let samples = vec![full_rows; self.learners.len()];
        let base = self
            .trainer()
            .train_all(&self.learners, samples, data, cancel)?;
        Ok((base, meta))
    }
}

/// One row per sample, one column per base learner.
fn stack_predictions(learners: &[Box<dyn BaseLearner>], features: &[Vec<f64>]) -> Vec<Vec<f64>> {
    features
        .iter()
        .map(|row| learners.iter().map(|l| l.predict(row)).collect())
        .collect()
}

impl BaseLearner for EnsembleModel {
    fn train(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(), TrainingError> {
        let (features, targets) = clean_training_rows(features, targets)?;
        let data = Dataset::new(features, targets, Vec::new())?;
        cancel.check()?;

        let base_value = data.targets.iter().sum::<f64>() / data.len() as f64;

        let (learners, meta) = match self.method {
            EnsembleMethod::Bagging => (self.train_bagging(&data, cancel)?, None),
            EnsembleMethod::Boosting => (self.train_boosting(&data, base_value, cancel)?, None),
            EnsembleMethod::Stacking => {
                let (base, meta) = self.train_stacking(&data, cancel)?;
                (base, Some(meta))
            }
        };

        info!(
            "EnsembleModel: Trained {} ensemble of {} learners on {} rows",
            self.method,
            learners.len(),
            data.len()
        );

        self.learners = learners;
        if meta.is_some() {
            self.meta_learner = meta;
        }
        self.base_value = base_value;
        self.n_features = data.n_features();
        self.trained = true;
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> f64 {
        if !self.trained {
            debug!("EnsembleModel: Predict on untrained ensemble, returning 0.0");
            return 0.0;
        }

        match self.method {
            EnsembleMethod::Bagging => {
                let sum: f64 = self.learners.iter().map(|l| l.predict(sample)).sum();
                sum / self.learners.len() as f64
            }
            EnsembleMethod::Boosting => {
                let stages: f64 = self.learners.iter().map(|l| l.predict(sample)).sum();
                self.base_value + self.settings.learning_rate * stages
            }
            EnsembleMethod::Stacking => {
                let level0: Vec<f64> = self.learners.iter().map(|l| l.predict(sample)).collect();
                match &self.meta_learner {
                    Some(meta) => meta.predict(&level0),
                    None => level0.iter().sum::<f64>() / level0.len() as f64,
                }
            }
        }
    }

    fn predict_batch(&self, samples: &[Vec<f64>]) -> Vec<f64> {
        samples.par_iter().map(|s| self.predict(s)).collect()
    }

    fn clone_untrained(&self) -> Box<dyn BaseLearner> {
        Box::new(EnsembleModel {
            method: self.method,
            learners: self.learners.iter().map(|l| l.clone_untrained()).collect(),
            meta_learner: self.meta_learner.as_ref().map(|m| m.clone_untrained()),
            base_value: 0.0,
            settings: self.settings.clone(),
            n_features: 0,
            trained: false,
        })
    }

    fn clone_trained(&self) -> Box<dyn BaseLearner> {
        Box::new(self.clone())
    }

    /// Mean of the base learners' importance vectors, renormalized.
    fn feature_importance(&self) -> Vec<f64> {
        if !self.trained {
            return Vec::new();
        }
        let mut total = vec![0.0; self.n_features];
        for learner in &self.learners {
            let importance = learner.feature_importance();
            if importance.len() != self.n_features {
                continue;
            }
            for (t, v) in total.iter_mut().zip(importance) {
                *t += v;
            }
        }
        normalize_importance(&total).unwrap_or_else(|| uniform_importance(self.n_features))
    }

    fn name(&self) -> &str {
        match self.method {
            EnsembleMethod::Bagging => "bagging_ensemble",
            EnsembleMethod::Boosting => "boosting_ensemble",
            EnsembleMethod::Stacking => "stacking_ensemble",
        }
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn hyperparameters(&self) -> serde_json::Value {
        let learners: Vec<serde_json::Value> = self
            .learners
            .iter()
            .map(|l| {
                serde_json::json!({
                    "learner": l.name(),
                    "hyperparameters": l.hyperparameters(),
                })
            })
            .collect();
        let meta = self.meta_learner.as_ref().map(|m| {
            serde_json::json!({
                "learner": m.name(),
                "hyperparameters": m.hyperparameters(),
            })
        });

        serde_json::json!({
            "method": self.method,
            "size": self.learners.len(),
            "learning_rate": self.settings.learning_rate,
            "stacking_holdout": self.settings.stacking_holdout,
            "seed": self.settings.seed,
            "learners": learners,
            "meta_learner": meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::regression_tree::{RegressionTree, TreeParams};

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64 / 6.0, (i % 7) as f64]).collect();
        let targets: Vec<f64> = (0..60).map(|i| if i < 30 { 0.0 } else { 10.0 }).collect();
        (features, targets)
    }

    fn seeded() -> EnsembleSettings {
        EnsembleSettings {
            workers: 3,
            seed: Some(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_bagging_fits_step() {
        let mut model =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &RegressionTree::default(), 8, seeded())
                .unwrap();
        let (features, targets) = step_data();
        model.fit(&features, &targets).unwrap();

        assert!(model.is_trained());
        assert_eq!(model.len(), 8);
        assert!(model.predict(&[0.5, 1.0]) < 2.0);
        assert!(model.predict(&[9.5, 1.0]) > 8.0);
    }

    #[test]
    fn test_seeded_bagging_is_reproducible() {
        let (features, targets) = step_data();
        let probe = vec![vec![4.9, 3.0], vec![5.1, 2.0], vec![2.0, 6.0]];

        let mut first =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &RegressionTree::default(), 5, seeded())
                .unwrap();
        first.fit(&features, &targets).unwrap();
        let mut second =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &RegressionTree::default(), 5, seeded())
                .unwrap();
        second.fit(&features, &targets).unwrap();

        assert_eq!(first.predict_batch(&probe), second.predict_batch(&probe));
    }

    #[test]
    fn test_boosting_improves_on_stump() {
        let stump = RegressionTree::new(TreeParams {
            max_depth: 1,
            ..Default::default()
        });
        let features: Vec<Vec<f64>> = (0..80).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..80).map(|i| (i / 20) as f64).collect();

        let settings = EnsembleSettings {
            learning_rate: 0.5,
            ..seeded()
        };
        let mut boosted =
            EnsembleModel::homogeneous(EnsembleMethod::Boosting, &stump, 20, settings).unwrap();
        boosted.fit(&features, &targets).unwrap();

        let mut single = stump.clone();
        single.fit(&features, &targets).unwrap();

        let mse = |m: &dyn BaseLearner| -> f64 {
            features
                .iter()
                .zip(&targets)
                .map(|(x, y)| (m.predict(x) - y).powi(2))
                .sum::<f64>()
                / targets.len() as f64
        };
        assert!(mse(&boosted) < mse(&single));
    }

    #[test]
    fn test_stacking_with_mixed_learners() {
        let learners: Vec<Box<dyn BaseLearner>> = vec![
            Box::new(RegressionTree::default()),
            Box::new(LinearLearner::ordinary()),
        ];
        let mut model = EnsembleModel::new(EnsembleMethod::Stacking, learners, seeded()).unwrap();
        // Target depends on parity so the trailing holdout sees both regimes
        let features: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64, (i % 2) as f64]).collect();
        let targets: Vec<f64> = (0..60).map(|i| 10.0 * (i % 2) as f64).collect();
        model.fit(&features, &targets).unwrap();

        assert!(model.predict(&[30.0, 0.0]) < 3.0);
        assert!(model.predict(&[30.0, 1.0]) > 7.0);
        let hyper = model.hyperparameters();
        assert_eq!(hyper["method"], "stacking");
        assert_eq!(hyper["meta_learner"]["learner"], "ridge");
    }

    #[test]
    fn test_untrained_and_clones() {
        let model =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &RegressionTree::default(), 3, seeded())
                .unwrap();
        assert_eq!(model.predict(&[1.0, 2.0]), 0.0);
        assert!(model.feature_importance().is_empty());

        let mut trained = model.clone();
        let (features, targets) = step_data();
        trained.fit(&features, &targets).unwrap();

        let fresh = trained.clone_untrained();
        assert!(!fresh.is_trained());
        let copy = trained.clone_trained();
        assert_eq!(copy.predict(&[9.0, 0.0]), trained.predict(&[9.0, 0.0]));

        let importance = trained.feature_importance();
        assert_eq!(importance.len(), 2);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(EnsembleModel::new(EnsembleMethod::Bagging, Vec::new(), seeded()).is_err());
        let bad_holdout = EnsembleSettings {
            stacking_holdout: 1.5,
            ..seeded()
        };
        assert!(
            EnsembleModel::homogeneous(EnsembleMethod::Stacking, &RegressionTree::default(), 2, bad_holdout)
                .is_err()
        );
    }

    #[test]
    fn test_failed_round_keeps_previous_state() {
        let mut model =
            EnsembleModel::homogeneous(EnsembleMethod::Bagging, &RegressionTree::default(), 3, seeded())
                .unwrap();
        let (features, targets) = step_data();
        model.fit(&features, &targets).unwrap();
        let before = model.predict(&[9.0, 0.0]);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = model.train(&features, &targets, &cancelled).unwrap_err();
        assert!(err.is_interruption());
        assert_eq!(model.predict(&[9.0, 0.0]), before);
    }
}
