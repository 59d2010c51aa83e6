use crate::domain::ml::learner::BaseLearner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an ensemble combines its base learners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMethod {
    Bagging,
    Boosting,
    Stacking,
}

impl fmt::Display for EnsembleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsembleMethod::Bagging => write!(f, "bagging"),
            EnsembleMethod::Boosting => write!(f, "boosting"),
            EnsembleMethod::Stacking => write!(f, "stacking"),
        }
    }
}

impl FromStr for EnsembleMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bagging" => Ok(EnsembleMethod::Bagging),
            "boosting" => Ok(EnsembleMethod::Boosting),
            "stacking" => Ok(EnsembleMethod::Stacking),
            _ => anyhow::bail!(
                "Invalid ensemble method: {}. Must be 'bagging', 'boosting', or 'stacking'",
                s
            ),
        }
    }
}

/// Lifecycle of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    Untrained,
    Trained,
    Stale,
    Retraining,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Untrained => write!(f, "Untrained"),
            ModelState::Trained => write!(f, "Trained"),
            ModelState::Stale => write!(f, "Stale"),
            ModelState::Retraining => write!(f, "Retraining"),
        }
    }
}

/// Condensed cross-validation outcome stored with a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub folds_used: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub avg_overfitting_gap: f64,
    pub overfitting_severity: String,
}

/// Persisted description of a trained model.
///
/// Holds hyperparameters and importance only. Tree structure is not
/// persisted; a model loaded from metadata must be retrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub learner: String,
    pub hyperparameters: serde_json::Value,
    pub feature_names: Vec<String>,
    pub feature_importance: Vec<f64>,
    pub data_hash: String,
    pub trained_at: DateTime<Utc>,
    pub validation: Option<ValidationSummary>,
}

impl ModelMetadata {
    pub fn describe(
        name: &str,
        model: &dyn BaseLearner,
        feature_names: &[String],
        data_hash: &str,
        validation: Option<ValidationSummary>,
    ) -> Self {
        Self {
            name: name.to_string(),
            learner: model.name().to_string(),
            hyperparameters: model.hyperparameters(),
            feature_names: feature_names.to_vec(),
            feature_importance: model.feature_importance(),
            data_hash: data_hash.to_string(),
            trained_at: Utc::now(),
            validation,
        }
    }

    /// Feature names paired with importance, most important first.
    pub fn ranked_features(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.feature_importance.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::regression_tree::RegressionTree;

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            "Bagging".parse::<EnsembleMethod>().unwrap(),
            EnsembleMethod::Bagging
        );
        assert_eq!(
            "stacking".parse::<EnsembleMethod>().unwrap(),
            EnsembleMethod::Stacking
        );
        assert!("voting".parse::<EnsembleMethod>().is_err());
    }

    #[test]
    fn test_metadata_serializes_without_structure() {
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (20 - i) as f64]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 2.0 }).collect();
        let mut tree = RegressionTree::default();
        crate::domain::ml::learner::BaseLearner::fit(&mut tree, &features, &targets).unwrap();

        let names = vec!["a".to_string(), "b".to_string()];
        let meta = ModelMetadata::describe("btc_tree", &tree, &names, "abc", None);
        let json = serde_json::to_string(&meta).unwrap();

        assert!(json.contains("max_depth"));
        assert!(!json.contains("threshold"));

        let back: ModelMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.ranked_features().len(), 2);
    }
}
