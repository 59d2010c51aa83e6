use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use std::fmt;

/// Capability contract shared by every trainable model.
///
/// Regression trees, the linear family, ensembles and any externally
/// supplied learner (neural network, transformer adapters) implement this
/// so the trainer, cache and validator can treat them identically.
pub trait BaseLearner: Send + Sync + fmt::Debug {
    /// Train in place. Implementations validate input, drop non-finite rows
    /// and check `cancel` between units of work.
    fn train(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        cancel: &CancellationToken,
    ) -> Result<(), TrainingError>;

    /// Predict one sample. Never fails: malformed input resolves to a
    /// neutral value so the serving path stays live.
    fn predict(&self, sample: &[f64]) -> f64;

    fn predict_batch(&self, samples: &[Vec<f64>]) -> Vec<f64> {
        samples.iter().map(|s| self.predict(s)).collect()
    }

    /// Fresh untrained instance with the same hyperparameters.
    fn clone_untrained(&self) -> Box<dyn BaseLearner>;

    /// Independent copy including trained state.
    fn clone_trained(&self) -> Box<dyn BaseLearner>;

    /// Normalized per-feature importance. Empty until trained.
    fn feature_importance(&self) -> Vec<f64>;

    fn name(&self) -> &str;

    fn is_trained(&self) -> bool;

    /// Hyperparameters as a JSON object, persisted with model metadata.
    fn hyperparameters(&self) -> serde_json::Value;

    /// Train without a budget.
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), TrainingError> {
        self.train(features, targets, &CancellationToken::new())
    }
}

impl Clone for Box<dyn BaseLearner> {
    fn clone(&self) -> Self {
        self.clone_trained()
    }
}

/// Uniform importance vector used when a learner cannot tell features apart.
pub fn uniform_importance(n_features: usize) -> Vec<f64> {
    if n_features == 0 {
        return Vec::new();
    }
    vec![1.0 / n_features as f64; n_features]
}

/// Scale non-negative weights to sum to one. Returns `None` when the total
/// is zero or not finite.
pub fn normalize_importance(raw: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(raw.iter().map(|v| v / total).collect())
}
