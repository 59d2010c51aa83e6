use crate::application::ml::ensemble::{EnsembleModel, EnsembleSettings};
use crate::config::TrainingEnvConfig;
use crate::domain::errors::TrainingError;
use crate::domain::ml::learner::BaseLearner;
use crate::domain::ml::linear::LinearLearner;
use crate::domain::ml::model::{EnsembleMethod, ModelMetadata};
use crate::domain::ml::regression_tree::RegressionTree;
use serde_json::Value;

/// The configured ensemble of regression trees.
pub fn build_ensemble(config: &TrainingEnvConfig) -> Result<EnsembleModel, TrainingError> {
    let tree = RegressionTree::new(config.tree).with_budget(config.timeout);
    EnsembleModel::homogeneous(
        config.ensemble_method,
        &tree,
        config.ensemble_size,
        config.ensemble_settings(),
    )
}

/// Untrained learner of kind `learner` with persisted hyperparameters.
/// `settings` supplies the runtime knobs (workers) that are not persisted.
pub fn learner_from_parts(
    learner: &str,
    hyperparameters: &Value,
    settings: &EnsembleSettings,
) -> Result<Box<dyn BaseLearner>, TrainingError> {
    match learner {
        "regression_tree" => Ok(Box::new(RegressionTree::from_hyperparameters(hyperparameters)?)),
        "linear" | "ridge" | "lasso" => Ok(Box::new(LinearLearner::from_hyperparameters(
            hyperparameters,
        )?)),
        "bagging_ensemble" | "boosting_ensemble" | "stacking_ensemble" => {
            Ok(Box::new(ensemble_from_hyperparameters(hyperparameters, settings)?))
        }
        other => Err(TrainingError::invalid(format!("unknown learner kind '{}'", other))),
    }
}

/// Rebuild an untrained model from metadata. Structure is never persisted,
/// so the result has to be retrained before it predicts anything useful.
pub fn learner_from_metadata(
    metadata: &ModelMetadata,
    settings: &EnsembleSettings,
) -> Result<Box<dyn BaseLearner>, TrainingError> {
    learner_from_parts(&metadata.learner, &metadata.hyperparameters, settings)
}

fn ensemble_from_hyperparameters(
    value: &Value,
    settings: &EnsembleSettings,
) -> Result<EnsembleModel, TrainingError> {
    let method: EnsembleMethod = serde_json::from_value(value["method"].clone())
        .map_err(|e| TrainingError::invalid(format!("bad ensemble method: {}", e)))?;

    let entries = value["learners"]
        .as_array()
        .ok_or_else(|| TrainingError::invalid("ensemble hyperparameters missing learners"))?;
    let learners = entries
        .iter()
        .map(|entry| {
            let kind = entry["learner"].as_str().unwrap_or_default();
            learner_from_parts(kind, &entry["hyperparameters"], settings)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let settings = EnsembleSettings {
        workers: settings.workers,
        seed: value["seed"].as_u64().or(settings.seed),
        learning_rate: value["learning_rate"].as_f64().unwrap_or(settings.learning_rate),
        stacking_holdout: value["stacking_holdout"]
            .as_f64()
            .unwrap_or(settings.stacking_holdout),
    };

    let mut model = EnsembleModel::new(method, learners, settings.clone())?;
    if let Some(kind) = value["meta_learner"]["learner"].as_str() {
        let meta = learner_from_parts(kind, &value["meta_learner"]["hyperparameters"], &settings)?;
        model = model.with_meta_learner(meta);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::regression_tree::TreeParams;

    #[test]
    fn test_build_from_config() {
        let config = TrainingEnvConfig {
            ensemble_size: 4,
            tree: TreeParams {
                max_depth: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let model = build_ensemble(&config).unwrap();
        assert_eq!(model.len(), 4);
        assert_eq!(model.method(), EnsembleMethod::Bagging);
        assert_eq!(model.hyperparameters()["learners"][0]["hyperparameters"]["max_depth"], 3);
    }

    #[test]
    fn test_rebuild_from_hyperparameters() {
        let learners: Vec<Box<dyn BaseLearner>> = vec![
            Box::new(RegressionTree::new(TreeParams {
                max_depth: 4,
                ..Default::default()
            })),
            Box::new(LinearLearner::lasso(0.2)),
        ];
        let settings = EnsembleSettings {
            seed: Some(3),
            ..Default::default()
        };
        let original = EnsembleModel::new(EnsembleMethod::Stacking, learners, settings.clone())
            .unwrap()
            .with_meta_learner(Box::new(LinearLearner::ordinary()));

        let rebuilt =
            learner_from_parts(original.name(), &original.hyperparameters(), &settings).unwrap();
        assert!(!rebuilt.is_trained());
        assert_eq!(rebuilt.hyperparameters(), original.hyperparameters());
    }

    #[test]
    fn test_unknown_kind() {
        let err = learner_from_parts("transformer", &Value::Null, &EnsembleSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("transformer"));
    }
}
