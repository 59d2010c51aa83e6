use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::clean_training_rows;
use crate::domain::ml::learner::{BaseLearner, normalize_importance, uniform_importance};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::lasso::{Lasso, LassoParameters};
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "penalty", rename_all = "snake_case")]
pub enum LinearPenalty {
    Ordinary,
    Ridge { alpha: f64 },
    Lasso { alpha: f64 },
}

impl LinearPenalty {
    fn learner_name(&self) -> &'static str {
        match self {
            LinearPenalty::Ordinary => "linear",
            LinearPenalty::Ridge { .. } => "ridge",
            LinearPenalty::Lasso { .. } => "lasso",
        }
    }
}

/// Linear, ridge or lasso regression fitted with smartcore.
///
/// Only the coefficients are kept after fitting, so prediction is a dot
/// product and clones are cheap.
#[derive(Debug, Clone)]
pub struct LinearLearner {
    penalty: LinearPenalty,
    weights: Vec<f64>,
    intercept: f64,
    fallback: f64,
    trained: bool,
}

impl LinearLearner {
    pub fn new(penalty: LinearPenalty) -> Self {
        Self {
            penalty,
            weights: Vec::new(),
            intercept: 0.0,
            fallback: 0.0,
            trained: false,
        }
    }

    pub fn ordinary() -> Self {
        Self::new(LinearPenalty::Ordinary)
    }

    pub fn ridge(alpha: f64) -> Self {
        Self::new(LinearPenalty::Ridge { alpha })
    }

    pub fn lasso(alpha: f64) -> Self {
        Self::new(LinearPenalty::Lasso { alpha })
    }

    pub fn from_hyperparameters(value: &serde_json::Value) -> Result<Self, TrainingError> {
        let penalty: LinearPenalty = serde_json::from_value(value.clone())
            .map_err(|e| TrainingError::invalid(format!("bad linear hyperparameters: {}", e)))?;
        Ok(Self::new(penalty))
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Fit and return predictions for the probe rows.
    fn fit_and_probe(
        &self,
        x: &DenseMatrix<f64>,
        y: &Vec<f64>,
        probes: &DenseMatrix<f64>,
    ) -> Result<Vec<f64>, TrainingError> {
        let name = self.penalty.learner_name();
        match self.penalty {
            LinearPenalty::Ordinary => {
                let model = LinearRegression::fit(x, y, LinearRegressionParameters::default())
                    .map_err(|e| TrainingError::learner(name, e))?;
                model
                    .predict(probes)
                    .map_err(|e| TrainingError::learner(name, e))
            }
            LinearPenalty::Ridge { alpha } => {
                let params = RidgeRegressionParameters::default().with_alpha(alpha);
                let model =
                    RidgeRegression::fit(x, y, params).map_err(|e| TrainingError::learner(name, e))?;
                model
                    .predict(probes)
                    .map_err(|e| TrainingError::learner(name, e))
            }
            LinearPenalty::Lasso { alpha } => {
                let params = LassoParameters::default().with_alpha(alpha);
                let model = Lasso::fit(x, y, params).map_err(|e| TrainingError::learner(name, e))?;
                model
                    .predict(probes)
                    .map_err(|e| TrainingError::learner(name, e))
            }
        }
    }
}

/// Origin followed by one unit vector per feature. For a linear model the
/// probe predictions give the intercept and each coefficient directly.
fn unit_probes(n_features: usize) -> Vec<Vec<f64>> {
    let mut probes = vec![vec![0.0; n_features]];
    for j in 0..n_features {
        let mut row = vec![0.0; n_features];
        row[j] = 1.0;
        probes.push(row);
    }
    probes
}

impl BaseLearner for LinearLearner {
    fn train(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(), TrainingError> {
        let (features, targets) = clean_training_rows(features, targets)?;
        cancel.check()?;

        let n_features = features[0].len();
        let name = self.penalty.learner_name();
        let x = DenseMatrix::from_2d_vec(&features).map_err(|e| TrainingError::learner(name, e))?;
        let probes = DenseMatrix::from_2d_vec(&unit_probes(n_features))
            .map_err(|e| TrainingError::learner(name, e))?;

        let probe_predictions = self.fit_and_probe(&x, &targets, &probes)?;
        if probe_predictions.len() != n_features + 1
            || probe_predictions.iter().any(|p| !p.is_finite())
        {
            return Err(TrainingError::learner(name, "degenerate coefficients"));
        }

        self.intercept = probe_predictions[0];
        self.weights = probe_predictions[1..]
            .iter()
            .map(|p| p - self.intercept)
            .collect();
        self.fallback = targets.iter().sum::<f64>() / targets.len() as f64;
        self.trained = true;

        debug!(
            "LinearLearner: Fitted {} on {} rows ({} features)",
            name,
            targets.len(),
            n_features
        );
        Ok(())
    }

    fn predict(&self, sample: &[f64]) -> f64 {
        if !self.trained {
            return 0.0;
        }
        if sample.len() < self.weights.len() || sample.iter().any(|v| !v.is_finite()) {
            debug!(
                "LinearLearner: Malformed {}-wide sample, using training mean",
                sample.len()
            );
            return self.fallback;
        }
        self.intercept
            + self
                .weights
                .iter()
                .zip(sample)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }

    fn clone_untrained(&self) -> Box<dyn BaseLearner> {
        Box::new(LinearLearner::new(self.penalty))
    }

    fn clone_trained(&self) -> Box<dyn BaseLearner> {
        Box::new(self.clone())
    }

    fn feature_importance(&self) -> Vec<f64> {
        if !self.trained {
            return Vec::new();
        }
        let magnitudes: Vec<f64> = self.weights.iter().map(|w| w.abs()).collect();
        normalize_importance(&magnitudes).unwrap_or_else(|| uniform_importance(self.weights.len()))
    }

    fn name(&self) -> &str {
        self.penalty.learner_name()
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(self.penalty).unwrap_or(serde_json::Value::Null)
    }
}
